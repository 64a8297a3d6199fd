//! Heap-resident datums.
//!
//! During evaluation a document is a graph of arena nodes: containers hold
//! handles to their elements, so sub-documents can be shared between results
//! without copying and collected independently.

use std::collections::BTreeMap;

use docql_core::datum::DatumType;
use docql_mem::{Ref, Trace};

pub type DatumRef = Ref;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<DatumRef>),
    Object(BTreeMap<String, DatumRef>),
}

impl Node {
    pub fn get_type(&self) -> DatumType {
        match self {
            Node::Null => DatumType::Null,
            Node::Bool(_) => DatumType::Bool,
            Node::Num(_) => DatumType::Num,
            Node::Str(_) => DatumType::Str,
            Node::Array(_) => DatumType::Array,
            Node::Object(_) => DatumType::Object,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.get_type().name()
    }
}

impl Trace for Node {
    fn trace(&self, out: &mut Vec<Ref>) {
        match self {
            Node::Array(items) => out.extend(items.iter().copied()),
            Node::Object(fields) => out.extend(fields.values().copied()),
            _ => {}
        }
    }
}
