//! Plain-text rendering of query results and users.

use std::fmt::Write;

use client_core::{ListedUser, QueryResult};
use shared::domain::UserRecord;

pub fn render_list(result: &QueryResult<Vec<ListedUser>>) -> String {
    if let Some(err) = &result.error {
        return format!("Error: {}", err.operation());
    }
    let Some(users) = &result.data else {
        return if result.is_loading {
            "Loading users...".to_string()
        } else {
            "No users loaded.".to_string()
        };
    };
    if users.is_empty() {
        return "No users found.".to_string();
    }

    let mut out = String::from("Users");
    if result.is_fetching {
        out.push_str(" (refreshing)");
    }
    for user in users {
        let record = &user.record;
        let _ = write!(
            out,
            "\n  [{:>3}] {:<24} {:<28} {}",
            record.id, record.name, record.email, record.company.name
        );
        if user.is_pending() {
            out.push_str("  (unsynced)");
        }
    }
    out
}

pub fn render_user(record: &UserRecord) -> String {
    format!(
        "User {id}\n  Name:    {name}\n  Email:   {email}\n  Phone:   {phone}\n  Website: {website}\n  Company: {company}",
        id = record.id,
        name = record.name,
        email = record.email,
        phone = record.phone,
        website = record.website_href(),
        company = record.company.name,
    )
}
