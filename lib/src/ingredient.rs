use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Intent, Result, ValidationState};

/// Role an ingredient plays in the claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relationship {
    ParentOf,
    #[default]
    ComponentOf,
    #[serde(alias = "ingredientOf")]
    InputTo,
}

/// The parts of an ingredient definition the builder reasons about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientSummary {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default, alias = "instanceId")]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub relationship: Relationship,
}

impl IngredientSummary {
    pub fn from_definition(definition: &Value) -> Result<Self> {
        Ok(Self::deserialize(definition)?)
    }

    pub fn is_parent(&self) -> bool {
        self.relationship == Relationship::ParentOf
    }
}

/// Ingredients attached to a builder session, in insertion order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Ingredients {
    entries: Vec<IngredientSummary>,
}

impl Ingredients {
    pub fn from_summaries(entries: Vec<IngredientSummary>) -> Self {
        Self { entries }
    }

    pub fn as_slice(&self) -> &[IngredientSummary] {
        &self.entries
    }

    pub fn push(&mut self, ingredient: IngredientSummary) {
        self.entries.push(ingredient);
    }

    fn parents(&self) -> usize {
        self.entries.iter().filter(|i| i.is_parent()).count()
    }

    /// Cardinality rules checked when an ingredient is added. `create` is
    /// only checked at sign time.
    pub fn admit(&self, intent: Option<&Intent>, candidate: &IngredientSummary) -> Result<()> {
        match intent {
            Some(Intent::Edit) if candidate.is_parent() && self.parents() > 0 => Err(
                Error::Validation("edit intent allows only one parentOf ingredient".to_owned()),
            ),
            Some(Intent::Update) if !candidate.is_parent() => Err(Error::Validation(
                "update intent only accepts a parentOf ingredient".to_owned(),
            )),
            Some(Intent::Update) if !self.entries.is_empty() => Err(Error::Validation(
                "update intent allows exactly one ingredient".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    /// Full structural check run before signing.
    pub fn validate_for_sign(&self, intent: Option<&Intent>) -> Result<()> {
        let parents = self.parents();
        match intent {
            Some(Intent::Create(_)) if parents > 0 => Err(Error::Validation(
                "create intent cannot have a parentOf ingredient".to_owned(),
            )),
            Some(Intent::Edit) if parents > 1 => Err(Error::Validation(format!(
                "edit intent allows one parentOf ingredient, found {parents}"
            ))),
            Some(Intent::Update) if self.entries.len() > 1 || parents != self.entries.len() => {
                Err(Error::Validation(
                    "update intent requires a single parentOf ingredient".to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Readers whose manifest failed validation cannot be imported as ingredients.
pub(crate) fn admit_reader(state: ValidationState) -> Result<()> {
    match state {
        ValidationState::Invalid => Err(Error::Validation(
            "cannot import an ingredient from a reader with an invalid manifest".to_owned(),
        )),
        ValidationState::Valid | ValidationState::Trusted => Ok(()),
    }
}
