use serde::{Deserialize, Serialize};

// -- Registration --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub handle: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    /// Deep link the user follows to verify channel membership with the bot.
    pub bot_link: String,
}

// -- Access gate --

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    pub handle: String,
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub access: bool,
}

// -- Subscriptions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscribeRequest {
    pub handle: String,
    pub channel: String,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub subscribed: String,
    /// Registrations counted inside the rolling window, this one included.
    pub used: u32,
}
