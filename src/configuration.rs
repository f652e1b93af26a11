//! §3.6-3.7, 3.9 / C3: node references, input values, and the concrete,
//! validated instance of a transform type.

use crate::error::{ConfigError, EngineResult};
use crate::metadata::TransformsMetaData;
use crate::option_value::OptionValue;
use crate::timeframe::{SessionRange, Timeframe};
use crate::value::Constant;
use std::collections::HashMap;
use std::sync::Arc;

/// §3.6: a pointer to another transform's declared output, by id + handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub node_id: String,
    pub handle: String,
}

impl NodeRef {
    pub fn new(node_id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            handle: handle.into(),
        }
    }

    /// The canonical column identifier `"{node_id}#{handle}"`.
    pub fn column_id(&self) -> String {
        format!("{}#{}", self.node_id, self.handle)
    }
}

/// §3.7: one input slot's wired value. `Empty` represents an unconnected
/// optional slot — never emitted as a column.
#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    Node(NodeRef),
    Literal(Constant),
    Empty,
}

impl InputValue {
    /// The column id this input resolves to, if it contributes a column at
    /// all (`Empty` does not).
    pub fn column_id(&self) -> Option<String> {
        match self {
            InputValue::Node(r) => Some(r.column_id()),
            InputValue::Literal(c) => Some(c.column_name()),
            InputValue::Empty => None,
        }
    }

    pub fn node_ref(&self) -> Option<&NodeRef> {
        match self {
            InputValue::Node(r) => Some(r),
            _ => None,
        }
    }
}

/// A slot name to its wired input(s); scalar slots carry exactly one entry,
/// variadic slots carry zero or more.
pub type InputMapping = HashMap<String, Vec<InputValue>>;

/// §3.9: a concrete, validated instance of a transform type.
#[derive(Clone, Debug)]
pub struct TransformConfiguration {
    pub metadata: Arc<TransformsMetaData>,
    pub id: String,
    pub options: HashMap<String, OptionValue>,
    pub inputs: InputMapping,
    pub timeframe: Timeframe,
    pub session: Option<SessionRange>,
}

impl TransformConfiguration {
    pub fn output_id(&self, handle: &str) -> String {
        format!("{}#{}", self.id, handle)
    }

    /// The ordered list of `InputValue`s wired to `slot`.
    pub fn get_inputs(&self, slot: &str) -> &[InputValue] {
        self.inputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Shorthand for a scalar (non-variadic) slot expected to carry exactly
    /// one input.
    pub fn get_input(&self, slot: &str) -> EngineResult<&InputValue> {
        match self.get_inputs(slot) {
            [single] => Ok(single),
            [] => Err(ConfigError::MissingInput {
                transform_id: self.id.clone(),
                slot: slot.to_string(),
            }
            .into()),
            _ => Err(ConfigError::BadOption {
                transform_id: self.id.clone(),
                name: slot.to_string(),
                reason: "expected exactly one input, found multiple".to_string(),
            }
            .into()),
        }
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(name)
    }

    pub fn is_cross_sectional(&self) -> bool {
        self.metadata.is_cross_sectional
    }

    /// All column ids this configuration's wired inputs resolve to, across
    /// every slot, in slot-then-position order.
    pub fn input_ids(&self) -> Vec<String> {
        self.inputs
            .values()
            .flatten()
            .filter_map(InputValue::column_id)
            .collect()
    }

    /// `NodeRef`s among the wired inputs — the edges this transform depends
    /// on in the DAG.
    pub fn node_dependencies(&self) -> Vec<&NodeRef> {
        self.inputs
            .values()
            .flatten()
            .filter_map(InputValue::node_ref)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{TransformCategory, TransformsMetaData};
    use crate::timeframe::TimeUnit;

    fn cfg(inputs: InputMapping) -> TransformConfiguration {
        TransformConfiguration {
            metadata: Arc::new(TransformsMetaData::new("sma", TransformCategory::Trend)),
            id: "b1".to_string(),
            options: HashMap::new(),
            inputs,
            timeframe: Timeframe::new(TimeUnit::Day, 1),
            session: None,
        }
    }

    #[test]
    fn node_ref_column_id_is_hash_joined() {
        let r = NodeRef::new("a1", "result");
        assert_eq!(r.column_id(), "a1#result");
    }

    #[test]
    fn get_input_requires_exactly_one() {
        let mut inputs = InputMapping::new();
        inputs.insert("x".to_string(), vec![InputValue::Node(NodeRef::new("a1", "result"))]);
        let c = cfg(inputs);
        assert!(c.get_input("x").is_ok());
        assert!(c.get_input("missing").is_err());
    }

    #[test]
    fn empty_input_contributes_no_column() {
        assert_eq!(InputValue::Empty.column_id(), None);
    }
}
