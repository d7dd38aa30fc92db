/**
 * SESSIONS - Comptabilité des sessions joueur
 *
 * RÔLE :
 * Transforme les événements join/leave reçus des serveurs en documents de
 * playtime persistés : horodatage de session ouverte, durées, cumul total.
 *
 * FONCTIONNEMENT :
 * - un document JSON par (server_id, uuid joueur), clé "playtime/{srv}/{uuid}"
 * - join : pose last_join ; leave : calcule la durée écoulée, ajoute un
 *   enregistrement de session, cumule total_playtime_seconds, efface last_join
 * - ne dépend que du trait StorageBackend, jamais d'un moteur concret
 */

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::storage::{StorageBackend, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no open session for player {0}")]
    NoOpenSession(String),
    #[error("corrupt playtime record for {0}")]
    CorruptRecord(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Une session terminée d'un joueur sur un serveur
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub joined_at: String,
    pub left_at: String,
    pub duration_seconds: u64,
    /// true quand le leave vient d'un kick/arrêt serveur, pas du joueur
    #[serde(default)]
    pub forced: bool,
}

/// Document de playtime d'un joueur sur un serveur
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerRecord {
    pub player_name: String,
    pub uuid: String,
    #[serde(default)]
    pub last_join: Option<String>,
    #[serde(default)]
    pub total_playtime_seconds: u64,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

pub struct SessionTracker {
    storage: Arc<dyn StorageBackend>,
}

impl SessionTracker {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    fn key(server_id: &str, uuid: &str) -> String {
        format!("playtime/{server_id}/{uuid}")
    }

    fn load(&self, server_id: &str, uuid: &str) -> Result<Option<PlayerRecord>, SessionError> {
        match self.storage.get(&Self::key(server_id, uuid))? {
            Some(value) => {
                let record = serde_json::from_value(value)
                    .map_err(|_| SessionError::CorruptRecord(uuid.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn store(&self, server_id: &str, record: &PlayerRecord) -> Result<(), SessionError> {
        let value = serde_json::to_value(record).map_err(StorageError::from)?;
        self.storage.put(&Self::key(server_id, &record.uuid), value)?;
        Ok(())
    }

    /// Ouvre une session : pose last_join.
    /// Un join sur une session déjà ouverte écrase l'horodatage (reconnexion
    /// sans leave, le cas typique d'un crash client).
    pub fn record_join(
        &self,
        server_id: &str,
        player_name: &str,
        uuid: &str,
        at: OffsetDateTime,
    ) -> Result<(), SessionError> {
        let mut record = self.load(server_id, uuid)?.unwrap_or_else(|| PlayerRecord {
            player_name: player_name.to_string(),
            uuid: uuid.to_string(),
            ..PlayerRecord::default()
        });
        record.player_name = player_name.to_string();
        record.last_join = Some(format_ts(at));
        self.store(server_id, &record)?;
        println!("[sessions] {player_name} joined {server_id}");
        Ok(())
    }

    /// Ferme la session ouverte : durée écoulée, cumul, last_join effacé
    pub fn record_leave(
        &self,
        server_id: &str,
        player_name: &str,
        uuid: &str,
        at: OffsetDateTime,
        forced: bool,
    ) -> Result<SessionRecord, SessionError> {
        let mut record = self
            .load(server_id, uuid)?
            .ok_or_else(|| SessionError::NoOpenSession(player_name.to_string()))?;
        let joined_at = record
            .last_join
            .take()
            .ok_or_else(|| SessionError::NoOpenSession(player_name.to_string()))?;

        let joined = OffsetDateTime::parse(&joined_at, &Rfc3339)
            .map_err(|_| SessionError::CorruptRecord(uuid.to_string()))?;
        let duration_seconds = (at - joined).whole_seconds().max(0) as u64;

        let session = SessionRecord {
            id: Uuid::new_v4().to_string(),
            joined_at,
            left_at: format_ts(at),
            duration_seconds,
            forced,
        };
        record.player_name = player_name.to_string();
        record.total_playtime_seconds += duration_seconds;
        record.sessions.push(session.clone());
        self.store(server_id, &record)?;
        println!("[sessions] {player_name} left {server_id} after {duration_seconds}s");
        Ok(session)
    }

    pub fn playtime_of(
        &self,
        server_id: &str,
        uuid: &str,
    ) -> Result<Option<PlayerRecord>, SessionError> {
        self.load(server_id, uuid)
    }
}

fn format_ts(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}
