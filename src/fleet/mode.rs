//! Live versus time-travel data sources.
//!
//! Every switch of [`TimeSelection`] starts a new epoch. Writers capture a
//! [`ModeToken`] when they issue a request and must check it is still current
//! when the response is merged; the previous epoch's cancellation token is
//! cancelled on switch so in-flight work can stop early.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{FleetError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "mode", content = "timestamp", rename_all = "snake_case")]
pub enum TimeSelection {
    #[default]
    Live,
    /// Opaque snapshot token as listed by the backend.
    Snapshot(String),
}

impl TimeSelection {
    /// An empty or missing token means live.
    pub fn from_token(token: Option<&str>) -> Self {
        match token.map(str::trim) {
            Some(t) if !t.is_empty() => TimeSelection::Snapshot(t.to_string()),
            _ => TimeSelection::Live,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, TimeSelection::Live)
    }

    pub fn snapshot_time(&self) -> Option<&str> {
        match self {
            TimeSelection::Live => None,
            TimeSelection::Snapshot(ts) => Some(ts),
        }
    }
}

/// Which backend endpoint serves the first paint in live mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LiveSource {
    #[default]
    FastPath,
    Aggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadIntent {
    /// Page load or mode switch.
    Initial,
    /// Explicit full refresh; bypasses backend caches.
    FullRefresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    LiveFastPath,
    LiveAggregate { refresh: bool },
    Historical(String),
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::LiveFastPath => "/api/dashboard/simple-clusters",
            Endpoint::LiveAggregate { .. } | Endpoint::Historical(_) => "/api/dashboard/summary",
        }
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Endpoint::LiveFastPath => Vec::new(),
            Endpoint::LiveAggregate { refresh: false } => Vec::new(),
            Endpoint::LiveAggregate { refresh: true } => vec![("refresh", "true".to_string())],
            Endpoint::Historical(ts) => vec![("snapshot_time", ts.clone())],
        }
    }

    /// Live loads are followed by per-cluster refreshes; historical ones never.
    pub fn fans_out(&self) -> bool {
        !matches!(self, Endpoint::Historical(_))
    }
}

pub fn resolve_source(selection: &TimeSelection, intent: LoadIntent, live: LiveSource) -> Endpoint {
    match (selection, intent) {
        (TimeSelection::Snapshot(ts), _) => Endpoint::Historical(ts.clone()),
        (TimeSelection::Live, LoadIntent::FullRefresh) => Endpoint::LiveAggregate { refresh: true },
        (TimeSelection::Live, LoadIntent::Initial) => match live {
            LiveSource::FastPath => Endpoint::LiveFastPath,
            LiveSource::Aggregate => Endpoint::LiveAggregate { refresh: false },
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeToken {
    pub epoch: u64,
    pub selection: TimeSelection,
}

struct ModeState {
    token: ModeToken,
    cancel: CancellationToken,
}

pub struct ModeSelector {
    state: RwLock<ModeState>,
    tx: watch::Sender<ModeToken>,
    live_source: LiveSource,
    state_path: Option<PathBuf>,
    state_writes: tokio::sync::Mutex<()>,
}

impl ModeSelector {
    pub fn new(live_source: LiveSource, state_path: Option<PathBuf>) -> Self {
        let selection = state_path
            .as_deref()
            .map(load_selection)
            .unwrap_or_default();
        if let TimeSelection::Snapshot(ts) = &selection {
            info!("resuming time travel at snapshot {}", ts);
        }
        let token = ModeToken {
            epoch: 0,
            selection,
        };
        let (tx, _) = watch::channel(token.clone());
        Self {
            state: RwLock::new(ModeState {
                token,
                cancel: CancellationToken::new(),
            }),
            tx,
            live_source,
            state_path,
            state_writes: tokio::sync::Mutex::new(()),
        }
    }

    pub fn current(&self) -> ModeToken {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .clone()
    }

    /// The current token together with the cancellation handle of its epoch.
    pub fn lease(&self) -> (ModeToken, CancellationToken) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        (state.token.clone(), state.cancel.clone())
    }

    pub fn is_current(&self, token: &ModeToken) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .epoch
            == token.epoch
    }

    pub fn selection(&self) -> TimeSelection {
        self.current().selection
    }

    pub fn resolve_source(&self, selection: &TimeSelection, intent: LoadIntent) -> Endpoint {
        resolve_source(selection, intent, self.live_source)
    }

    /// Switches the session to `selection`. Selecting what is already active
    /// keeps the current epoch.
    pub async fn switch(&self, selection: TimeSelection) -> ModeToken {
        let token = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.token.selection == selection {
                return state.token.clone();
            }
            state.cancel.cancel();
            state.cancel = CancellationToken::new();
            state.token = ModeToken {
                epoch: state.token.epoch + 1,
                selection,
            };
            state.token.clone()
        };

        match &token.selection {
            TimeSelection::Live => info!("switched to live mode (epoch {})", token.epoch),
            TimeSelection::Snapshot(ts) => {
                info!("switched to snapshot {} (epoch {})", ts, token.epoch)
            }
        }

        self.tx.send_replace(token.clone());
        self.persist().await;
        token
    }

    /// Writes whatever selection is current once the previous write is done,
    /// so racing switches leave the newest one on disk.
    async fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let _writing = self.state_writes.lock().await;
        if let Err(e) = save_selection(path, &self.selection()).await {
            warn!("{}", e);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ModeToken> {
        self.tx.subscribe()
    }
}

fn load_selection(path: &Path) -> TimeSelection {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return TimeSelection::Live,
        Err(e) => {
            warn!("reading time selection {}: {}", path.display(), e);
            return TimeSelection::Live;
        }
    };
    serde_json::from_str(&data).unwrap_or_else(|e| {
        warn!("parsing time selection {}: {}", path.display(), e);
        TimeSelection::Live
    })
}

async fn save_selection(path: &Path, selection: &TimeSelection) -> Result<()> {
    let state_err = |message: String| FleetError::State {
        path: path.display().to_string(),
        message,
    };
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| state_err(e.to_string()))?;
        }
    }
    let data = serde_json::to_string(selection).map_err(|e| state_err(e.to_string()))?;
    tokio::fs::write(path, data)
        .await
        .map_err(|e| state_err(e.to_string()))
}
