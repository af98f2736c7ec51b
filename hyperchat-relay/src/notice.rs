//! Text lines the relay itself sends to clients.

/// Reply to an unrecognised `:`-command.
pub const INVALID_COMMAND: &str = "Server: Invalid command!";

/// Reply when a directed message or file names an absent handle.
pub const USER_NOT_FOUND: &str = "Server: User not found! (try using :list to see active users).";

/// Sent to a destination after it received every declared file byte.
pub const FILE_SENT: &str = "Server: File sent successfully!";

/// Sent to a destination when the file ended short of its declared size.
pub const FILE_NOT_SENT: &str = "Server: File not sent!";

/// Sent to everyone when the relay stops accepting connections.
pub const SHUTTING_DOWN: &str = "Server: Relay shutting down!";

/// A relayed chat line as seen by recipients.
#[must_use]
pub fn chat(sender: &str, body: &str) -> String {
    format!("{sender}: {body}")
}

#[must_use]
pub fn welcome(handle: &str) -> String {
    format!("Server: Welcome, {handle}!")
}

#[must_use]
pub fn joined(handle: &str) -> String {
    format!("Server: {handle} has entered the chat!")
}

#[must_use]
pub fn left(handle: &str) -> String {
    format!("Server: {handle} has left the chat!")
}

#[must_use]
pub fn handle_taken(handle: &str) -> String {
    format!("Server: Handle '{handle}' is already in use!")
}

/// Reply to `:list`, handles in registration order.
#[must_use]
pub fn active_users(handles: &[String]) -> String {
    let names: Vec<String> = handles.iter().map(|h| format!("@{h}")).collect();
    format!("Server: Active users: {}", names.join(", "))
}

#[must_use]
pub fn file_announce(sender: &str, name: &str) -> String {
    format!("Server: {sender} has sent a file: {name}")
}

#[must_use]
pub fn file_too_large(size: u64, max: u64) -> String {
    format!("Server: File too large: {size} bytes (max {max})")
}
