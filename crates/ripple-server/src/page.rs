//! Embedded browser chat client served at `/chat`.

use axum::response::Html;

/// The chat page, compiled into the binary.
pub const CHAT_PAGE: &str = include_str!("../assets/chat.html");

/// GET /chat
pub async fn chat_page() -> Html<&'static str> {
    Html(CHAT_PAGE)
}
