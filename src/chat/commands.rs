//! Slash command parsing for the chat application.
//!
//! Input that starts with `/` drives the session and the conversation list
//! instead of being sent to the model.  Indices typed by the user are
//! 1-based; the parsed commands carry 0-based indices.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Sign in with an email and password.
    Login { email: String, password: String },

    /// Sign in with a Google credential.
    Google(String),

    /// Sign out.
    Logout,

    /// Request a password reset code for an email.
    Forgot(String),

    /// Verify the reset code.
    Otp(String),

    /// Set a new password after the code was verified.
    Reset { password: String, confirm: String },

    /// List conversations.
    Chats,

    /// Start a new conversation.
    New,

    /// Open a conversation.
    Select(usize),

    /// Retitle a conversation.
    Rename { index: usize, title: String },

    /// Delete a conversation.
    DeleteChat(usize),

    /// Show the messages of the current conversation.
    Messages,

    /// Replace a user message and ask again.
    Edit { index: usize, text: String },

    /// Ask again for a response.
    Regenerate(usize),

    /// Delete a message and everything after it.
    Delete(usize),

    /// Attach a file to the next message.
    Attach(String),

    /// Drop a pending attachment.
    Detach(String),

    /// List pending attachments.
    Attachments,

    /// Turn temporary mode on or off.
    Temporary(bool),

    /// Filter the conversation list.
    /// `None` lists everything.
    Search(Option<String>),

    /// Update the display name and optionally the profile picture.
    Profile { name: String, picture: Option<String> },

    /// Delete the account.
    DeleteAccount,

    /// Show who is signed in.
    WhoAmI,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be sent as a message.
///
/// # Examples
///
/// ```
/// # use parley::chat::{ChatCommand, parse_command};
/// assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
/// assert_eq!(parse_command("/select 2"), Some(ChatCommand::Select(1)));
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "login" => match argument.and_then(|arg| arg.split_once(char::is_whitespace)) {
            Some((email, password)) if !password.trim().is_empty() => ChatCommand::Login {
                email: email.to_string(),
                password: password.trim().to_string(),
            },
            _ => ChatCommand::Invalid("/login requires an email and a password".to_string()),
        },
        "google" => required(argument, "/google requires a credential", ChatCommand::Google),
        "logout" => ChatCommand::Logout,
        "forgot" => required(argument, "/forgot requires an email", ChatCommand::Forgot),
        "otp" => required(argument, "/otp requires the code from your email", ChatCommand::Otp),
        "reset" => {
            let words: Vec<&str> = argument.map(|a| a.split_whitespace().collect()).unwrap_or_default();
            match words.as_slice() {
                [password, confirm] => ChatCommand::Reset {
                    password: password.to_string(),
                    confirm: confirm.to_string(),
                },
                _ => ChatCommand::Invalid(
                    "/reset requires the new password twice".to_string(),
                ),
            }
        }
        "chats" | "ls" => ChatCommand::Chats,
        "new" => ChatCommand::New,
        "select" | "open" => parse_index(argument, "/select", ChatCommand::Select),
        "rename" => match split_index(argument, "/rename") {
            Ok((index, Some(title))) => ChatCommand::Rename { index, title },
            Ok((_, None)) => ChatCommand::Invalid("/rename requires a title".to_string()),
            Err(err) => ChatCommand::Invalid(err),
        },
        "delete-chat" => parse_index(argument, "/delete-chat", ChatCommand::DeleteChat),
        "messages" | "show" => ChatCommand::Messages,
        "edit" => match split_index(argument, "/edit") {
            Ok((index, Some(text))) => ChatCommand::Edit { index, text },
            Ok((_, None)) => ChatCommand::Invalid("/edit requires the new text".to_string()),
            Err(err) => ChatCommand::Invalid(err),
        },
        "regen" | "regenerate" => parse_index(argument, "/regen", ChatCommand::Regenerate),
        "delete" => parse_index(argument, "/delete", ChatCommand::Delete),
        "attach" => required(argument, "/attach requires a file path", ChatCommand::Attach),
        "detach" => required(argument, "/detach requires an attachment id", ChatCommand::Detach),
        "files" => ChatCommand::Attachments,
        "temporary" | "temp" => match argument.and_then(parse_on_off) {
            Some(value) => ChatCommand::Temporary(value),
            None => ChatCommand::Invalid("/temporary expects 'on' or 'off'".to_string()),
        },
        "search" => ChatCommand::Search(argument.map(|s| s.to_string())),
        "profile" => match argument {
            Some(arg) => {
                let (name, picture) = match arg.split_once("--picture") {
                    Some((name, path)) => (name.trim(), Some(path.trim()).filter(|p| !p.is_empty())),
                    None => (arg, None),
                };
                ChatCommand::Profile {
                    name: name.to_string(),
                    picture: picture.map(String::from),
                }
            }
            None => ChatCommand::Invalid(
                "/profile requires a name (and optionally --picture <path>)".to_string(),
            ),
        },
        "delete-account" => ChatCommand::DeleteAccount,
        "whoami" => ChatCommand::WhoAmI,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

fn required<F>(argument: Option<&str>, error: &str, constructor: F) -> ChatCommand
where
    F: Fn(String) -> ChatCommand,
{
    match argument {
        Some(arg) => constructor(arg.to_string()),
        None => ChatCommand::Invalid(error.to_string()),
    }
}

fn parse_index<F>(argument: Option<&str>, name: &str, constructor: F) -> ChatCommand
where
    F: Fn(usize) -> ChatCommand,
{
    match argument {
        Some(arg) => match one_based(arg) {
            Some(index) => constructor(index),
            None => ChatCommand::Invalid(format!("{} expects a number starting at 1", name)),
        },
        None => ChatCommand::Invalid(format!("{} requires a number", name)),
    }
}

fn split_index(argument: Option<&str>, name: &str) -> Result<(usize, Option<String>), String> {
    let Some(arg) = argument else {
        return Err(format!("{} requires a number", name));
    };
    let (index, rest) = match arg.split_once(char::is_whitespace) {
        Some((index, rest)) => (index, Some(rest.trim()).filter(|r| !r.is_empty())),
        None => (arg, None),
    };
    let index = one_based(index).ok_or_else(|| format!("{} expects a number starting at 1", name))?;
    Ok((index, rest.map(String::from)))
}

fn one_based(value: &str) -> Option<usize> {
    value.parse::<usize>().ok()?.checked_sub(1)
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" => Some(true),
        "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /login <email> <password>   Sign in
  /google <credential>        Sign in with a Google credential
  /logout                     Sign out
  /forgot <email>             Email a password reset code
  /otp <code>                 Verify the reset code
  /reset <new> <confirm>      Choose a new password
  /chats                      List conversations
  /new                        Start a new conversation
  /select <n>                 Open conversation n
  /rename <n> <title>         Retitle conversation n
  /delete-chat <n>            Delete conversation n
  /messages                   Show the current conversation
  /edit <n> <text>            Replace message n and ask again
  /regen <n>                  Regenerate response n
  /delete <n>                 Delete message n and everything after it
  /attach <path>              Attach a file to the next message
  /detach <id>                Drop a pending attachment
  /files                      List pending attachments
  /temporary on|off           Stop or resume saving new conversations
  /search [query]             Filter conversations
  /profile <name> [--picture <path>]
                              Update your profile
  /delete-account             Delete your account
  /whoami                     Show who is signed in
  /help                       Show this help message
  /quit                       Exit the chat"#
}
