//! Create/edit form for a single user.
//!
//! The form owns its [`DraftUser`] and moves through
//! `Empty -> Editing -> {Valid, Invalid} -> Submitting -> {Editing, Closed}`.
//! Field errors are cleared one field at a time as the user types, but the
//! full error map is only rebuilt by [`UserForm::validate`], which every
//! submit attempt runs first. Nothing reaches the network unless the draft
//! passes.

use std::{collections::BTreeMap, sync::OnceLock};

use regex::Regex;
use shared::{
    domain::{DraftUser, UserField, UserRecord},
    error::ValidationFailure,
};
use thiserror::Error;
use tracing::debug;

use crate::mutations::{MutationError, UserMutations};

pub type ValidationErrorMap = BTreeMap<UserField, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormState {
    Empty,
    Editing,
    Valid,
    Invalid,
    Submitting,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit(UserRecord),
}

/// The remote call a passing submit turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitRequest {
    Create(DraftUser),
    Update(UserRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("{} field(s) failed validation", .0.len())]
    Invalid(ValidationErrorMap),
    #[error("a submission is already in flight")]
    SubmitInFlight,
    #[error("inputs are disabled while submitting")]
    InputsDisabled,
    #[error("the form is closed")]
    Closed,
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

fn email_regex() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        // Unanchored: the shape only has to occur somewhere in the value.
        Regex::new(r"\S+@\S+\.\S+")
            .unwrap_or_else(|error| panic!("email regex failed to compile: {error}"))
    })
}

/// `text@text.text` with no whitespace inside the match.
pub fn is_email_shaped(value: &str) -> bool {
    email_regex().is_match(value)
}

pub fn check_field(field: UserField, value: &str) -> Option<ValidationFailure> {
    let value = value.trim();
    if value.is_empty() {
        return Some(ValidationFailure::new(
            field,
            format!("{} is required", field.label()),
        ));
    }
    if field == UserField::Email && !is_email_shaped(value) {
        return Some(ValidationFailure::new(field, "Email is invalid"));
    }
    None
}

pub fn validate_draft(draft: &DraftUser) -> ValidationErrorMap {
    UserField::ALL
        .into_iter()
        .filter_map(|field| check_field(field, draft.get(field)))
        .map(|failure| (failure.field, failure.message))
        .collect()
}

pub struct UserForm {
    mode: FormMode,
    draft: DraftUser,
    errors: ValidationErrorMap,
    state: FormState,
    remote_error: Option<MutationError>,
}

impl UserForm {
    pub fn create() -> Self {
        Self {
            mode: FormMode::Create,
            draft: DraftUser::default(),
            errors: ValidationErrorMap::new(),
            state: FormState::Empty,
            remote_error: None,
        }
    }

    pub fn edit(record: UserRecord) -> Self {
        Self {
            draft: DraftUser::from(&record),
            mode: FormMode::Edit(record),
            errors: ValidationErrorMap::new(),
            state: FormState::Editing,
            remote_error: None,
        }
    }

    pub fn mode(&self) -> &FormMode {
        &self.mode
    }

    pub fn state(&self) -> FormState {
        self.state
    }

    pub fn draft(&self) -> &DraftUser {
        &self.draft
    }

    pub fn errors(&self) -> &ValidationErrorMap {
        &self.errors
    }

    pub fn error_for(&self, field: UserField) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }

    pub fn remote_error(&self) -> Option<&MutationError> {
        self.remote_error.as_ref()
    }

    pub fn inputs_disabled(&self) -> bool {
        matches!(self.state, FormState::Submitting | FormState::Closed)
    }

    pub fn title(&self) -> &'static str {
        match self.mode {
            FormMode::Create => "Create New User",
            FormMode::Edit(_) => "Edit User",
        }
    }

    pub fn submit_label(&self) -> &'static str {
        match (&self.mode, self.state) {
            (_, FormState::Submitting) => "Saving...",
            (FormMode::Create, _) => "Create User",
            (FormMode::Edit(_), _) => "Update User",
        }
    }

    pub fn set_field(&mut self, field: UserField, value: impl Into<String>) -> Result<(), FormError> {
        match self.state {
            FormState::Submitting => return Err(FormError::InputsDisabled),
            FormState::Closed => return Err(FormError::Closed),
            _ => {}
        }
        self.draft.set(field, value);
        self.errors.remove(&field);
        self.state = FormState::Editing;
        Ok(())
    }

    /// Full validation pass; replaces the error map wholesale.
    pub fn validate(&mut self) -> &ValidationErrorMap {
        self.errors = validate_draft(&self.draft);
        if matches!(
            self.state,
            FormState::Empty | FormState::Editing | FormState::Valid | FormState::Invalid
        ) {
            self.state = if self.errors.is_empty() {
                FormState::Valid
            } else {
                FormState::Invalid
            };
        }
        &self.errors
    }

    /// Validates and, on a pass, locks the inputs and hands back the call to make.
    pub fn begin_submit(&mut self) -> Result<SubmitRequest, FormError> {
        match self.state {
            FormState::Submitting => return Err(FormError::SubmitInFlight),
            FormState::Closed => return Err(FormError::Closed),
            _ => {}
        }

        if !self.validate().is_empty() {
            debug!(invalid = self.errors.len(), "submit blocked by validation");
            return Err(FormError::Invalid(self.errors.clone()));
        }

        self.remote_error = None;
        self.state = FormState::Submitting;
        Ok(match &self.mode {
            FormMode::Create => SubmitRequest::Create(self.draft.clone()),
            FormMode::Edit(record) => {
                SubmitRequest::Update(UserRecord::from_draft(record.id, self.draft.clone()))
            }
        })
    }

    /// Closes the form on success; on failure reopens it with the values kept.
    pub fn complete_submit(
        &mut self,
        result: Result<UserRecord, MutationError>,
    ) -> Result<UserRecord, FormError> {
        if self.state != FormState::Submitting {
            return Err(FormError::Closed);
        }
        match result {
            Ok(record) => {
                self.state = FormState::Closed;
                self.draft = DraftUser::default();
                self.errors.clear();
                Ok(record)
            }
            Err(err) => {
                self.state = FormState::Editing;
                self.remote_error = Some(err.clone());
                Err(FormError::Mutation(err))
            }
        }
    }

    pub async fn submit(&mut self, mutations: &UserMutations) -> Result<UserRecord, FormError> {
        let result = match self.begin_submit()? {
            SubmitRequest::Create(draft) => mutations.create_user(draft).await,
            SubmitRequest::Update(record) => mutations.update_user(record).await,
        };
        self.complete_submit(result)
    }

    /// Discards the draft. Not allowed while a submission is in flight.
    pub fn cancel(&mut self) -> Result<(), FormError> {
        if self.state == FormState::Submitting {
            return Err(FormError::InputsDisabled);
        }
        self.state = FormState::Closed;
        self.draft = DraftUser::default();
        self.errors.clear();
        self.remote_error = None;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/form_tests.rs"]
mod tests;
