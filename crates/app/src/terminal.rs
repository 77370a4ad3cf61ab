//! Line-oriented terminal front end.

use std::sync::Arc;

use murmur_session::{
    DeleteChoice, DeletePrompt, Session, SessionErrorKind, SessionHandle, SessionOptions,
    SessionResult, SessionSnapshot,
};
use murmur_storage::{MessageId, SqliteStorage};
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::commands::{Command, parse_command, parse_confirmation};
use crate::error::{AppError, OpenStorageSnafu, ReadInputSnafu, StartSessionSnafu};
use crate::render::{message_lines, prompt_lines, status_line};
use crate::settings::MirrorSettings;

pub async fn run(settings: MirrorSettings) -> Result<(), AppError> {
    let storage = SqliteStorage::open(&settings.database_path)
        .await
        .context(OpenStorageSnafu {
            stage: "terminal-open-storage",
            database_path: settings.database_path.clone(),
        })?;

    let options = SessionOptions::default().with_mutation_timeout(settings.mutation_timeout());
    let handle = Session::start(
        settings.collection.clone(),
        &storage,
        Arc::new(storage.clone()),
        options,
    )
    .await
    .context(StartSessionSnafu {
        stage: "terminal-start-session",
        collection: settings.collection.clone(),
    })?;

    println!("murmur: '{}' (type /quit to leave)", settings.collection);
    let renderer = tokio::spawn(render_changes(handle.subscribe()));
    let outcome = read_commands(&handle).await;

    let final_snapshot = handle.end().await;
    if let Err(error) = renderer.await {
        tracing::warn!(error = %error, "render task did not finish cleanly");
    }
    tracing::info!(
        collection = %settings.collection,
        messages = final_snapshot.messages.len(),
        "terminal session closed"
    );
    outcome
}

async fn read_commands(handle: &SessionHandle) -> Result<(), AppError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_delete: Option<DeletePrompt> = None;

    while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
        stage: "terminal-read-line",
    })? {
        if let Some(prompt) = pending_delete.take() {
            let choice = if parse_confirmation(&line) {
                DeleteChoice::Confirm
            } else {
                DeleteChoice::Cancel
            };
            report(handle.resolve_delete(prompt, choice).await);
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(error) => {
                println!("!! {error}");
                continue;
            }
        };

        match command {
            Command::Empty => {}
            Command::Quit => break,
            Command::List => print_messages(&handle.snapshot()),
            Command::Text(text) => {
                if handle.snapshot().edit().is_some() {
                    report(handle.update_draft(text).await);
                } else {
                    report(handle.submit_new(text).await);
                }
            }
            Command::Edit(position) => match message_at(&handle.snapshot(), position) {
                Some(message_id) => report(handle.open_edit(message_id).await),
                None => println!("!! no message #{position}"),
            },
            Command::Save => report(handle.save_edit().await),
            Command::Cancel => report(handle.cancel_edit().await),
            Command::Delete(position) => match message_at(&handle.snapshot(), position) {
                Some(message_id) => {
                    let prompt = handle.request_delete(message_id);
                    for line in prompt_lines(&prompt) {
                        println!("{line}");
                    }
                    pending_delete = Some(prompt);
                }
                None => println!("!! no message #{position}"),
            },
        }
    }

    Ok(())
}

fn message_at(snapshot: &SessionSnapshot, position: usize) -> Option<MessageId> {
    position
        .checked_sub(1)
        .and_then(|index| snapshot.messages.get(index))
        .map(|message| message.id.clone())
}

fn report(result: SessionResult<()>) {
    match result {
        Ok(()) => {}
        // Gateway failures surface through the snapshot's last error.
        Err(error) if error.kind() == SessionErrorKind::Gateway => {}
        Err(error) => println!("!! {error}"),
    }
}

async fn render_changes(mut snapshots: watch::Receiver<SessionSnapshot>) {
    let mut previous: Option<SessionSnapshot> = None;
    loop {
        let current = snapshots.borrow_and_update().clone();
        render_diff(previous.as_ref(), &current);
        previous = Some(current);

        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

fn render_diff(previous: Option<&SessionSnapshot>, current: &SessionSnapshot) {
    let messages_changed =
        previous.is_none_or(|previous| !Arc::ptr_eq(&previous.messages, &current.messages));
    if messages_changed {
        print_messages(current);
    }

    let status = status_line(current);
    if previous.map(status_line).as_deref() != Some(status.as_str()) {
        println!("-- {status}");
    }

    if let Some(error) = &current.last_error
        && previous.and_then(|previous| previous.last_error.as_ref()) != Some(error)
    {
        println!("!! {error}");
    }
}

fn print_messages(snapshot: &SessionSnapshot) {
    if snapshot.messages.is_empty() {
        println!("(no messages)");
        return;
    }
    for line in message_lines(&snapshot.messages) {
        println!("{line}");
    }
}
