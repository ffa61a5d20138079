//! Process-wide default client.
//!
//! Applications build one [`Client`] at startup, install it here, and pass
//! it (or clones of it) to the code that needs it. Nothing in the library
//! reaches for the default on its own.

use once_cell::sync::OnceCell;

use super::core::Client;
use crate::{Error, Result};

static DEFAULT: OnceCell<Client> = OnceCell::new();

/// Install the default client. Fails if one is already installed.
pub fn install_default(client: Client) -> Result<()> {
    DEFAULT
        .set(client)
        .map_err(|_| Error::configuration("default client already installed"))
}

pub fn default_client() -> Option<&'static Client> {
    DEFAULT.get()
}

/// The installed default, or an error naming the missing setup step.
pub fn require_default() -> Result<&'static Client> {
    default_client().ok_or_else(|| Error::configuration("no default client installed"))
}
