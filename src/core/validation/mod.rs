//! Input validation for entity writes
//!
//! [`validate_input`] checks a request body against an entity's fields and
//! returns only the keys that were present and valid. Unknown keys are
//! dropped, so clients cannot assign columns they were not meant to touch.

pub mod validators;

pub use crate::core::query::{ParsedQuery, validate_query_params};

use crate::core::entity::{Entity, Operation};
use crate::core::error::{FieldValidationError, ZapiError};
use serde_json::{Map, Value};

/// Outcome of [`validate_input`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<FieldValidationError>,
    /// Present, valid keys only. Defaults are not merged in.
    pub data: Map<String, Value>,
}

impl ValidationResult {
    /// Convert into the sanitized data or a validation error
    pub fn into_result(self) -> Result<Map<String, Value>, ZapiError> {
        if self.valid {
            Ok(self.data)
        } else {
            Err(ZapiError::validation(self.errors))
        }
    }
}

/// Validate a create/update body against `entity`
pub fn validate_input(entity: &Entity, input: &Value, operation: Operation) -> ValidationResult {
    let Some(input) = input.as_object() else {
        return ValidationResult {
            valid: false,
            errors: vec![FieldValidationError::new("body", "Expected a JSON object")],
            data: Map::new(),
        };
    };

    let owner_key = entity.config.owner_field.as_deref();
    let mut errors = Vec::new();
    let mut data = Map::new();

    for (key, def) in entity.input_fields() {
        // the owner key is set from the authenticated user, never from the body
        if Some(key) == owner_key {
            continue;
        }

        match input.get(key) {
            None => {
                if operation == Operation::Create && !def.optional && def.default.is_none() {
                    errors.push(FieldValidationError::new(key, "Required"));
                }
            }
            Some(Value::Null) => {
                if def.optional {
                    data.insert(key.to_string(), Value::Null);
                } else {
                    errors.push(FieldValidationError::new(key, "Cannot be null"));
                }
            }
            Some(value) => {
                let checked = if def.is_relation() {
                    validators::check_foreign_key(value)
                } else {
                    validators::check_scalar(def, value)
                };
                match checked {
                    Ok(()) => {
                        data.insert(key.to_string(), value.clone());
                    }
                    Err(message) => errors.push(FieldValidationError::new(key, message)),
                }
            }
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::entity;
    use crate::core::field::{belongs_to, has_many, int, string};
    use crate::fields;
    use serde_json::json;

    fn user() -> Entity {
        entity(
            "user",
            fields! {
                name: string().min(1.0),
                email: string().email().unique(),
                age: int().optional(),
                role: string().default("member"),
                posts: has_many("post"),
            },
        )
        .unwrap()
        .build()
        .unwrap()
    }

    fn post() -> Entity {
        entity(
            "post",
            fields! {
                title: string(),
                category: belongs_to("category"),
                author: belongs_to("user"),
            },
        )
        .unwrap()
        .owned_by("author")
        .unwrap()
        .build()
        .unwrap()
    }

    #[test]
    fn test_valid_create_keeps_only_present_keys() {
        let result = validate_input(
            &user(),
            &json!({"name": "Ann", "email": "ann@x.io", "isAdmin": true}),
            Operation::Create,
        );
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.data.len(), 2);
        assert!(!result.data.contains_key("isAdmin"));
        assert!(!result.data.contains_key("role"));
    }

    #[test]
    fn test_required_on_create_only() {
        let result = validate_input(&user(), &json!({"name": "Ann"}), Operation::Create);
        assert!(!result.valid);
        assert_eq!(result.errors, vec![FieldValidationError::new("email", "Required")]);

        let result = validate_input(&user(), &json!({"name": "Ann"}), Operation::Update);
        assert!(result.valid);
    }

    #[test]
    fn test_relation_reports_foreign_key() {
        let result = validate_input(&post(), &json!({"title": "Hi"}), Operation::Create);
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["categoryId"]);
    }

    #[test]
    fn test_owner_key_never_taken_from_input() {
        let result = validate_input(
            &post(),
            &json!({"title": "Hi", "categoryId": "c1", "authorId": "someone-else"}),
            Operation::Create,
        );
        assert!(result.valid);
        assert!(!result.data.contains_key("authorId"));
    }

    #[test]
    fn test_null_handling() {
        let result = validate_input(&user(), &json!({"age": null}), Operation::Update);
        assert!(result.valid);
        assert_eq!(result.data["age"], Value::Null);

        let result = validate_input(&user(), &json!({"name": null}), Operation::Update);
        assert_eq!(
            result.errors,
            vec![FieldValidationError::new("name", "Cannot be null")]
        );
    }

    #[test]
    fn test_has_many_is_not_input() {
        let result = validate_input(
            &user(),
            &json!({"name": "Ann", "email": "a@b.co", "posts": [1, 2]}),
            Operation::Create,
        );
        assert!(result.valid);
        assert!(!result.data.contains_key("posts"));
    }

    #[test]
    fn test_type_errors_collected_per_field() {
        let result = validate_input(
            &user(),
            &json!({"name": "", "email": "nope", "age": 1.5}),
            Operation::Create,
        );
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3);
        assert!(result.data.is_empty());
    }

    #[test]
    fn test_non_object_body() {
        let result = validate_input(&user(), &json!([1, 2]), Operation::Create);
        assert!(!result.valid);
        assert_eq!(result.errors[0].field, "body");
        assert!(result.clone().into_result().is_err());
    }
}
