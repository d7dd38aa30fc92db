/**
 * AUTH - Tokens d'authentification des agents serveur
 *
 * RÔLE :
 * Mapping server_id -> token secret, généré une fois au premier enregistrement
 * et persisté en YAML. Un token émis n'est jamais régénéré : les agents déjà
 * déployés doivent continuer de fonctionner.
 *
 * FONCTIONNEMENT :
 * - fichier absent => créé au premier ensure_tokens
 * - vérification en temps constant (xor-fold), jamais de comparaison ==
 * - toute requête heartbeat/plugin/logs passe par verify avant le Registry
 */

use parking_lot::Mutex;
use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("token file invalid: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub struct TokenStore {
    path: PathBuf,
    tokens: Mutex<BTreeMap<String, String>>,
}

impl TokenStore {
    /// Charge le fichier de tokens ; absent => store vide
    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let tokens = if path.exists() {
            let txt = fs::read_to_string(path).await?;
            if txt.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_yaml::from_str(&txt)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path: path.to_path_buf(), tokens: Mutex::new(tokens) })
    }

    /// Génère un token pour chaque id qui n'en a pas encore, et persiste si
    /// quelque chose a changé. Les tokens existants restent intacts.
    /// Retourne le nombre de tokens générés.
    pub async fn ensure_tokens<I, S>(&self, server_ids: I) -> Result<usize, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut generated = 0usize;
        {
            let mut tokens = self.tokens.lock();
            for id in server_ids {
                let id = id.as_ref();
                if !tokens.contains_key(id) {
                    tokens.insert(id.to_string(), generate_token());
                    println!("[auth] new token generated for '{id}'");
                    generated += 1;
                }
            }
        }
        if generated > 0 || !self.path.exists() {
            self.save().await?;
            println!("[auth] token file updated: {:?}", self.path);
        }
        Ok(generated)
    }

    async fn save(&self) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let yaml = {
            let tokens = self.tokens.lock();
            serde_yaml::to_string(&*tokens)?
        };
        fs::write(&self.path, yaml).await?;
        Ok(())
    }

    /// Vérifie le token présenté pour un serveur, en temps constant.
    /// Id inconnu => refus (pas de canal pour les serveurs non enregistrés).
    pub fn verify(&self, server_id: &str, presented: &str) -> bool {
        let tokens = self.tokens.lock();
        match tokens.get(server_id) {
            Some(expected) => constant_time_eq(expected.as_bytes(), presented.as_bytes()),
            None => false,
        }
    }

    pub fn token_for(&self, server_id: &str) -> Option<String> {
        self.tokens.lock().get(server_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 32 octets aléatoires en hexadécimal (64 caractères)
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(64);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Comparaison sans court-circuit : le temps ne dépend pas de la position
/// du premier octet différent. La longueur, elle, n'est pas masquée.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
