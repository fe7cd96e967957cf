use tracing::debug;

use super::{Archetype, EditableSurface};
use crate::dom::{char_len, split_at_char, DispatchedEvent, Document, NodeId};
use crate::errors::InsertError;

/// An `input` or `textarea`. Selection is a pair of character offsets.
#[derive(Debug, Clone)]
pub struct PlainField {
    document: Document,
    field: NodeId,
}

impl PlainField {
    pub fn new(document: &Document, field: NodeId) -> Self {
        Self {
            document: document.clone(),
            field,
        }
    }

    pub fn node(&self) -> NodeId {
        self.field
    }
}

impl EditableSurface for PlainField {
    fn archetype(&self) -> Archetype {
        Archetype::PlainField
    }

    fn write(&self, payload: &str) -> Result<(), InsertError> {
        let doc = &self.document;
        let value = doc.value(self.field)?;
        let len = char_len(&value);
        let (start, end) = doc.field_selection(self.field)?.unwrap_or((len, len));
        let start = start.min(len);
        let end = end.clamp(start, len);

        let (prefix, rest) = split_at_char(&value, start);
        let (_, suffix) = split_at_char(&rest, end - start);
        doc.set_value(self.field, &format!("{prefix}{payload}{suffix}"))?;

        let caret = start + char_len(payload);
        doc.set_field_selection(self.field, caret, caret)?;
        debug!("wrote {} chars into field {:?} at {}", char_len(payload), self.field, start);
        self.notify()
    }

    fn notify(&self) -> Result<(), InsertError> {
        self.document.dispatch_event(DispatchedEvent::input(self.field))?;
        self.document.dispatch_event(DispatchedEvent::change(self.field))?;
        Ok(())
    }

    fn strip_trigger(&self, trigger: char) -> Result<bool, InsertError> {
        let doc = &self.document;
        let Some((caret, _)) = doc.field_selection(self.field)? else {
            return Ok(false);
        };
        if caret == 0 {
            return Ok(false);
        }
        let value = doc.value(self.field)?;
        if value.chars().nth(caret - 1) != Some(trigger) {
            return Ok(false);
        }
        let (head, rest) = split_at_char(&value, caret - 1);
        let (_, tail) = split_at_char(&rest, 1);
        doc.set_value(self.field, &format!("{head}{tail}"))?;
        doc.set_field_selection(self.field, caret - 1, caret - 1)?;
        doc.dispatch_event(DispatchedEvent::input(self.field))?;
        Ok(true)
    }
}
