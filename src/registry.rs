//! C2: the process-lifetime catalogue of declared transform metadata, and
//! the validated instantiation of a [`TransformConfiguration`] from it.

use crate::configuration::{InputMapping, TransformConfiguration};
use crate::error::{ConfigError, EngineResult};
use crate::metadata::TransformsMetaData;
use crate::option_value::OptionValue;
use crate::timeframe::{SessionRange, Timeframe};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns declarative metadata for every known transform type and validates
/// instantiation against it. Built once at process start; immutable and
/// lock-free to read thereafter.
#[derive(Default)]
pub struct Registry {
    by_id: HashMap<String, Arc<TransformsMetaData>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, metadata: TransformsMetaData) {
        self.by_id.insert(metadata.id.clone(), Arc::new(metadata));
    }

    pub fn get_metadata(&self, type_id: &str) -> EngineResult<Arc<TransformsMetaData>> {
        self.by_id
            .get(type_id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownTransform(type_id.to_string()).into())
    }

    /// Fills in defaults, coerces option types, rejects unknown options,
    /// enforces required options/numeric bounds/select membership.
    pub fn instantiate(
        &self,
        type_id: &str,
        id: impl Into<String>,
        mut options: HashMap<String, OptionValue>,
        inputs: InputMapping,
        timeframe: Timeframe,
        session: Option<SessionRange>,
    ) -> EngineResult<TransformConfiguration> {
        let id = id.into();
        let metadata = self.get_metadata(type_id)?;

        let known: std::collections::HashSet<&str> =
            metadata.options.iter().map(|o| o.name.as_str()).collect();
        for name in options.keys() {
            if !known.contains(name.as_str()) {
                return Err(ConfigError::BadOption {
                    transform_id: id,
                    name: name.clone(),
                    reason: "unknown option".to_string(),
                }
                .into());
            }
        }

        for decl in &metadata.options {
            let entry = options.get(&decl.name).cloned();
            let value = match entry {
                Some(v) => v,
                None => match &decl.default {
                    Some(default) => default.clone(),
                    None => {
                        if decl.required {
                            return Err(ConfigError::BadOption {
                                transform_id: id,
                                name: decl.name.clone(),
                                reason: "required option missing, no default".to_string(),
                            }
                            .into());
                        }
                        continue;
                    }
                },
            };

            if let (Some(min), Some(actual)) = (decl.min, value.as_decimal()) {
                if actual < min {
                    return Err(ConfigError::BadOption {
                        transform_id: id,
                        name: decl.name.clone(),
                        reason: format!("value {actual} below minimum {min}"),
                    }
                    .into());
                }
            }
            if let (Some(max), Some(actual)) = (decl.max, value.as_decimal()) {
                if actual > max {
                    return Err(ConfigError::BadOption {
                        transform_id: id,
                        name: decl.name.clone(),
                        reason: format!("value {actual} above maximum {max}"),
                    }
                    .into());
                }
            }
            if !decl.select_options.is_empty() {
                if let Some(s) = value.as_str() {
                    if !decl.select_options.iter().any(|o| o == s) {
                        return Err(ConfigError::BadOption {
                            transform_id: id,
                            name: decl.name.clone(),
                            reason: format!(
                                "'{s}' is not one of the allowed values: {:?}",
                                decl.select_options
                            ),
                        }
                        .into());
                    }
                }
            }

            options.insert(decl.name.clone(), value);
        }

        for io in &metadata.inputs {
            let wired = inputs.get(&io.id).map(Vec::as_slice).unwrap_or(&[]);
            if wired.is_empty() && !io.allow_multiple_connections && metadata.at_least_one_input_required {
                return Err(ConfigError::MissingInput {
                    transform_id: id,
                    slot: io.id.clone(),
                }
                .into());
            }
        }

        Ok(TransformConfiguration {
            metadata,
            id,
            options,
            inputs,
            timeframe,
            session,
        })
    }

    /// Expands colon-prefixed `requiredDataSources` templates
    /// (`"ECON:{category}:value"`) against the configuration's resolved
    /// options, substituting `{option_name}` placeholders.
    pub fn required_data_sources(&self, cfg: &TransformConfiguration) -> Vec<String> {
        cfg.metadata
            .required_data_sources
            .iter()
            .map(|template| expand_template(template, cfg))
            .collect()
    }
}

fn expand_template(template: &str, cfg: &TransformConfiguration) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i..].find('}') {
                let name = &template[i + 1..i + end];
                match cfg.option(name).and_then(OptionValue::as_str) {
                    Some(v) => out.push_str(v),
                    None => out.push_str(&template[i..i + end + 1]),
                }
                i += end + 1;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}
