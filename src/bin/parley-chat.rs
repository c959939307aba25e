//! Interactive chat client for the parley backend.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local backend as a guest
//! parley-chat
//!
//! # Try two backends in order and remember the session between runs
//! parley-chat --backends https://api.example.com,http://localhost:8080 \
//!     --session-file ~/.parley-session.json
//!
//! # Disable colors (useful for piping output)
//! parley-chat --no-color
//! ```
//!
//! While chatting, type `/help` for the list of slash commands.  Anything
//! else is sent to the model.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use parley::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatView, PlainTextRenderer, Renderer, SendOutcome,
    help_text, parse_command,
};
use parley::{
    ApiClient, Auth, FileStorage, PasswordReset, Route, RouteSlot, SessionKey, SessionManager,
    Upload,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let (args, _) = ChatArgs::from_command_line_relaxed("parley-chat [OPTIONS]");
    let client_config = args.client_config()?;
    let config = ChatConfig::from(&args);
    let use_color = config.use_color;

    let session = Arc::new(match client_config.session_file() {
        Some(path) => SessionManager::new(FileStorage::new(path))?,
        None => SessionManager::in_memory(),
    });
    let navigator = Arc::new(RouteSlot::new());
    let client = ApiClient::new(&client_config, Arc::clone(&session), navigator.clone())?;
    let auth = Auth::new(client.clone());
    let view = ChatView::new(client, config, confirm);
    let mut reset: Option<PasswordReset> = None;
    let mut renderer = PlainTextRenderer::with_color(use_color);
    let mut rl = DefaultEditor::new()?;

    println!("Parley Chat ({})", client_config.backends().join(", "));
    println!("Type /help for commands, /quit to exit\n");

    view.load().await;
    show_current(&view, &mut renderer);
    drain(&view, &navigator, &mut renderer);

    loop {
        let readline = rl.readline("You: ");

        let line = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        let Some(cmd) = parse_command(line) else {
            let outcome = view.send(line).await;
            print_outcome(&view, &mut renderer, &outcome);
            if drain(&view, &navigator, &mut renderer) {
                view.load().await;
                show_current(&view, &mut renderer);
            }
            continue;
        };

        match cmd {
            ChatCommand::Quit => {
                println!("Goodbye!");
                break;
            }
            ChatCommand::Help => {
                for line in help_text().lines() {
                    println!("    {}", line);
                }
            }
            ChatCommand::Login { email, password } => {
                match auth.login(&email, &password).await {
                    Ok(user) => renderer.print_info(&format!("Signed in as {}", user.display_name())),
                    Err(err) => renderer.print_error(err.message()),
                }
            }
            ChatCommand::Google(credential) => match auth.google_login(&credential).await {
                Ok(user) => renderer.print_info(&format!("Signed in as {}", user.display_name())),
                Err(err) => renderer.print_error(err.message()),
            },
            ChatCommand::Logout => {
                view.flush_background().await;
                auth.logout();
                renderer.print_info("Signed out.");
            }
            ChatCommand::Forgot(email) => {
                let flow = reset.get_or_insert_with(|| auth.password_reset());
                match flow.request_code(&email).await {
                    Ok(()) => renderer.print_info("Reset code sent. Enter it with /otp <code>."),
                    Err(err) => renderer.print_error(err.message()),
                }
            }
            ChatCommand::Otp(code) => match reset.as_mut() {
                Some(flow) => match flow.verify_code(&code).await {
                    Ok(()) => renderer.print_info("Code verified. Choose a password with /reset."),
                    Err(err) => renderer.print_error(err.message()),
                },
                None => renderer.print_error("Request a code with /forgot <email> first"),
            },
            ChatCommand::Reset { password, confirm } => match reset.as_mut() {
                Some(flow) => match flow.reset(&password, &confirm).await {
                    Ok(()) => {
                        reset = None;
                        renderer.print_info("Password updated. Sign in with /login.");
                    }
                    Err(err) => renderer.print_error(err.message()),
                },
                None => renderer.print_error("Request a code with /forgot <email> first"),
            },
            ChatCommand::Chats => print_chats(&view, &mut renderer, ""),
            ChatCommand::Search(query) => {
                print_chats(&view, &mut renderer, query.as_deref().unwrap_or(""))
            }
            ChatCommand::New => {
                view.new_chat().await;
                show_current(&view, &mut renderer);
            }
            ChatCommand::Select(index) => match view.select_chat(index).await {
                Ok(()) => show_current(&view, &mut renderer),
                Err(err) => renderer.print_error(err.message()),
            },
            ChatCommand::Rename { index, title } => {
                if let Err(err) = view.rename_chat(index, &title).await {
                    renderer.print_error(err.message());
                }
            }
            ChatCommand::DeleteChat(index) => match view.delete_chat(index).await {
                Ok(true) => show_current(&view, &mut renderer),
                Ok(false) => {}
                Err(err) => renderer.print_error(err.message()),
            },
            ChatCommand::Messages => show_current(&view, &mut renderer),
            ChatCommand::Edit { index, text } => match view.edit_message(index, &text).await {
                Ok(outcome) => print_outcome(&view, &mut renderer, &outcome),
                Err(err) => renderer.print_error(err.message()),
            },
            ChatCommand::Regenerate(index) => match view.regenerate(index).await {
                Ok(outcome) => print_outcome(&view, &mut renderer, &outcome),
                Err(err) => renderer.print_error(err.message()),
            },
            ChatCommand::Delete(index) => {
                if view.delete_message(index) {
                    show_current(&view, &mut renderer);
                }
            }
            ChatCommand::Attach(path) => match view.attach_file(&path).await {
                Ok(attachment) => renderer.print_info(&format!(
                    "Attached {} ({})",
                    attachment.name,
                    attachment.size_label()
                )),
                Err(err) => renderer.print_error(err.message()),
            },
            ChatCommand::Detach(id) => {
                if !view.remove_attachment(&id) {
                    renderer.print_error(&format!("No attachment with id {id}"));
                }
            }
            ChatCommand::Attachments => renderer.print_attachments(&view.pending_attachments()),
            ChatCommand::Temporary(on) => {
                view.set_temporary_mode(on).await;
                renderer.print_info(if on {
                    "Temporary mode on: new chats are not saved."
                } else {
                    "Temporary mode off."
                });
            }
            ChatCommand::Profile { name, picture } => {
                let picture = match picture {
                    Some(path) => match Upload::from_path(&path).await {
                        Ok(upload) => Some(upload),
                        Err(err) => {
                            renderer.print_error(err.message());
                            continue;
                        }
                    },
                    None => None,
                };
                match auth.update_profile(&name, picture).await {
                    Ok(result) if result.ok => renderer.print_info("Profile updated."),
                    Ok(result) => renderer.print_error(
                        result.error.as_deref().unwrap_or("Profile update failed"),
                    ),
                    Err(err) => renderer.print_error(err.message()),
                }
            }
            ChatCommand::DeleteAccount => {
                if confirm("Delete your account? This cannot be undone.") {
                    let result = auth.delete_account().await;
                    if !result.ok {
                        renderer.print_error(result.error.as_deref().unwrap_or("Delete failed"));
                    }
                }
            }
            ChatCommand::WhoAmI => {
                let snapshot = session.snapshot();
                match snapshot.user_name {
                    Some(name) => {
                        let email = snapshot.user_email.unwrap_or_default();
                        renderer.print_info(&format!("{name} <{email}>"));
                        if session.temporary_mode() {
                            renderer.print_info("Temporary mode is on.");
                        }
                    }
                    None => renderer.print_info("Not signed in."),
                }
                if session.get(SessionKey::AccessToken).is_none() && session.has_user() {
                    renderer.print_info("No access token; requests will ask you to sign in again.");
                }
            }
            ChatCommand::Invalid(message) => {
                renderer.print_error(&message);
            }
        }

        if drain(&view, &navigator, &mut renderer) {
            view.load().await;
            show_current(&view, &mut renderer);
            drain(&view, &navigator, &mut renderer);
        }
    }

    view.flush_background().await;
    Ok(())
}

/// Print pending notices and routes.  Returns true if the view must reload.
fn drain(view: &ChatView, navigator: &RouteSlot, renderer: &mut impl Renderer) -> bool {
    for notice in view.drain_notices() {
        renderer.print_notice(&notice);
    }
    match navigator.take() {
        Some(route) => {
            renderer.print_route(route);
            matches!(route, Route::Chat | Route::Entry | Route::Login)
        }
        None => false,
    }
}

fn show_current(view: &ChatView, renderer: &mut impl Renderer) {
    if let Some(conversation) = view.current() {
        renderer.print_conversation(&conversation);
    }
}

fn print_chats(view: &ChatView, renderer: &mut impl Renderer, query: &str) {
    renderer.print_conversations(&view.search(query), view.current_index());
}

fn print_outcome(view: &ChatView, renderer: &mut impl Renderer, outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Replied | SendOutcome::Failed(_) => {
            if let Some(conversation) = view.current() {
                let index = conversation.messages.len().saturating_sub(1);
                if let Some(message) = conversation.messages.last() {
                    renderer.print_message(index, message);
                }
            }
        }
        SendOutcome::Rejected(reason) => {
            renderer.print_info(&format!("Not sent ({reason:?})."));
        }
        SendOutcome::Stale => {}
    }
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
