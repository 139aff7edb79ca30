use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);

impl UserId {
    /// Ids handed out by the backend are positive; anything else means "no entity bound".
    pub fn is_bound(self) -> bool {
        self.0 > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    pub company: Company,
}

impl UserRecord {
    pub fn from_draft(id: UserId, draft: DraftUser) -> Self {
        Self {
            id,
            name: draft.name,
            email: draft.email,
            phone: draft.phone,
            website: draft.website,
            company: draft.company,
        }
    }

    /// Website as a navigable link; bare hostnames get an https scheme.
    pub fn website_href(&self) -> String {
        if self.website.starts_with("http") {
            self.website.clone()
        } else {
            format!("https://{}", self.website)
        }
    }
}

/// Editable user fields without the server-assigned id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftUser {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    pub company: Company,
}

impl DraftUser {
    pub fn get(&self, field: UserField) -> &str {
        match field {
            UserField::Name => &self.name,
            UserField::Email => &self.email,
            UserField::Phone => &self.phone,
            UserField::Website => &self.website,
            UserField::CompanyName => &self.company.name,
        }
    }

    pub fn set(&mut self, field: UserField, value: impl Into<String>) {
        let value = value.into();
        match field {
            UserField::Name => self.name = value,
            UserField::Email => self.email = value,
            UserField::Phone => self.phone = value,
            UserField::Website => self.website = value,
            UserField::CompanyName => self.company.name = value,
        }
    }
}

impl From<&UserRecord> for DraftUser {
    fn from(record: &UserRecord) -> Self {
        Self {
            name: record.name.clone(),
            email: record.email.clone(),
            phone: record.phone.clone(),
            website: record.website.clone(),
            company: record.company.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserField {
    Name,
    Email,
    Phone,
    Website,
    CompanyName,
}

impl UserField {
    pub const ALL: [UserField; 5] = [
        UserField::Name,
        UserField::Email,
        UserField::Phone,
        UserField::Website,
        UserField::CompanyName,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UserField::Name => "name",
            UserField::Email => "email",
            UserField::Phone => "phone",
            UserField::Website => "website",
            UserField::CompanyName => "companyName",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            UserField::Name => "Name",
            UserField::Email => "Email",
            UserField::Phone => "Phone",
            UserField::Website => "Website",
            UserField::CompanyName => "Company name",
        }
    }
}

impl fmt::Display for UserField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
