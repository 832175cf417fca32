use crate::router::AppState;

use super::{reply, Actor};

const SESSION_INACTIVE: &str =
    "⚠️ Speed dating is not active. Wait for an organizer to start a session.";
const SESSION_ACTIVE: &str =
    "💬 The session is live! Use /contact @username or /contact #number to reach someone.";

/// Free text (anything that is not a command) is only accepted while a speed
/// dating session is open.
pub(crate) async fn handle_text(state: &AppState, actor: &Actor) {
    if state.gate.is_active() {
        reply(state, actor, SESSION_ACTIVE).await;
    } else {
        reply(state, actor, SESSION_INACTIVE).await;
    }
}
