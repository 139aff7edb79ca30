mod commands;
mod view;

use std::io::Write;

use anyhow::Result;
use client_core::{load_settings, DirectoryClient, FormError, SubmitRequest, UserForm};
use commands::{parse, ConsoleCommand, HELP};
use shared::domain::{UserField, UserId, UserRecord};
use tokio::io::{stdin, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Typed at a field prompt to abandon the form.
const CANCEL_INPUT: &str = ".";

struct Console {
    client: DirectoryClient,
    lines: Lines<BufReader<Stdin>>,
}

impl Console {
    fn new(client: DirectoryClient) -> Self {
        Self {
            client,
            lines: BufReader::new(stdin()).lines(),
        }
    }

    /// `None` once stdin is closed.
    async fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        print!("{label}");
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?)
    }

    async fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.prompt(&format!("{question} [y/N] ")).await?;
        Ok(answer.is_some_and(|a| matches!(a.trim(), "y" | "Y" | "yes")))
    }

    async fn run(&mut self) -> Result<()> {
        self.show_list().await;
        loop {
            let Some(line) = self.prompt("> ").await? else {
                return Ok(());
            };
            let command = match parse(&line) {
                Ok(command) => command,
                Err(err) => {
                    println!("{err}");
                    continue;
                }
            };
            match command {
                ConsoleCommand::List => self.show_list().await,
                ConsoleCommand::Refresh => self.refresh().await,
                ConsoleCommand::Show(id) => self.show_user(id).await,
                ConsoleCommand::New => {
                    let form = self.client.create_form();
                    self.run_form(form).await?;
                }
                ConsoleCommand::Edit(id) => {
                    if let Some(record) = self.find_user(id).await {
                        let form = self.client.edit_form(record);
                        self.run_form(form).await?;
                    }
                }
                ConsoleCommand::Delete(id) => self.delete(id).await?,
                ConsoleCommand::Help => println!("{HELP}"),
                ConsoleCommand::Quit => return Ok(()),
            }
        }
    }

    async fn show_list(&self) {
        let result = self.client.queries().use_collection().await;
        println!("{}", view::render_list(&result));
    }

    async fn refresh(&self) {
        match self.client.queries().refetch_collection().await {
            Ok(_) => self.show_list().await,
            Err(err) => println!("Error: {}", err.operation()),
        }
    }

    async fn show_user(&self, id: UserId) {
        if let Some(record) = self.find_user(id).await {
            println!("{}", view::render_user(&record));
        }
    }

    /// Prefers the row already listed so unsynced users can be opened too.
    async fn find_user(&self, id: UserId) -> Option<UserRecord> {
        let listed = self
            .client
            .queries()
            .collection_snapshot()
            .data
            .and_then(|users| users.into_iter().find(|user| user.id() == id));
        if let Some(user) = listed {
            return Some(user.record);
        }

        let result = self.client.queries().use_entity(id).await;
        match (result.data, result.error) {
            (Some(record), _) => Some(record),
            (None, Some(err)) if err.status() == Some(404) => {
                println!("User not found");
                None
            }
            (None, Some(err)) => {
                println!("Error: {}", err.operation());
                None
            }
            (None, None) => None,
        }
    }

    async fn run_form(&mut self, mut form: UserForm) -> Result<()> {
        println!("{} (blank keeps the current value, '{CANCEL_INPUT}' cancels)", form.title());
        let mut fields: Vec<UserField> = UserField::ALL.to_vec();

        loop {
            for field in fields {
                if let Some(message) = form.error_for(field) {
                    println!("  {message}");
                }
                let current = form.draft().get(field).to_string();
                let Some(input) = self.prompt(&format!("{} [{current}]: ", field.label())).await?
                else {
                    return Ok(());
                };
                let input = input.trim();
                if input == CANCEL_INPUT {
                    form.cancel()?;
                    println!("Cancelled.");
                    return Ok(());
                }
                if !input.is_empty() {
                    form.set_field(field, input)?;
                }
            }

            let request = match form.begin_submit() {
                Ok(request) => request,
                Err(FormError::Invalid(errors)) => {
                    fields = errors.keys().copied().collect();
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            println!("{}", form.submit_label());

            let mutations = self.client.mutations();
            let result = match request {
                SubmitRequest::Create(draft) => mutations.create_user(draft).await,
                SubmitRequest::Update(record) => mutations.update_user(record).await,
            };
            match form.complete_submit(result) {
                Ok(record) => {
                    info!(user_id = %record.id, "form submitted");
                    println!("Saved user {}.", record.id);
                    self.show_list().await;
                    return Ok(());
                }
                Err(FormError::Mutation(err)) => {
                    println!("Error: {err}");
                    if !self.confirm("Try again?").await? {
                        form.cancel()?;
                        return Ok(());
                    }
                    fields = Vec::new();
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn delete(&mut self, id: UserId) -> Result<()> {
        if !self
            .confirm("Are you sure you want to delete this user?")
            .await?
        {
            return Ok(());
        }
        match self.client.mutations().delete_user(id).await {
            Ok(()) => {
                println!("Deleted user {id}.");
                self.show_list().await;
            }
            Err(err) => println!("Error: {err}"),
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings();
    info!(base_url = %settings.base_url, "starting user directory console");
    let client = DirectoryClient::from_settings(&settings)?;

    Console::new(client).run().await
}
