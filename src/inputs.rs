use std::fmt;

use tokio::sync::watch;

/// Long-lived device credential sent as the API key on backend requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

// Never print the key itself
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Signals pushed into the coordinator by external providers
///
/// The activation flow owns the credential and the reachability probe owns
/// connectivity; the coordinator only reads the latest value of each.
#[derive(Clone, Debug)]
pub struct SyncInputs {
    pub credential: watch::Receiver<Option<Credential>>,
    pub online: watch::Receiver<bool>,
}

/// Sending halves kept by whoever provides the inputs
#[derive(Debug)]
pub struct InputHandles {
    pub credential: watch::Sender<Option<Credential>>,
    pub online: watch::Sender<bool>,
}

impl SyncInputs {
    /// Create an input pair seeded with initial values
    pub fn channel(credential: Option<Credential>, online: bool) -> (InputHandles, Self) {
        let (credential_tx, credential_rx) = watch::channel(credential);
        let (online_tx, online_rx) = watch::channel(online);

        (
            InputHandles {
                credential: credential_tx,
                online: online_tx,
            },
            Self {
                credential: credential_rx,
                online: online_rx,
            },
        )
    }

    /// The credential to sync with, if the device is both authenticated and online
    pub fn ready(&self) -> Option<Credential> {
        if !*self.online.borrow() {
            return None;
        }
        self.credential.borrow().clone()
    }
}
