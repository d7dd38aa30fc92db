/**
 * SUPERVISOR - Lancement et arrêt des processus serveur
 *
 * RÔLE :
 * Pose l'intention de cycle de vie (starting/stopping) au moment où la
 * commande est émise ; la confirmation (online/offline) n'arrive que par le
 * Heartbeat Engine, qui parle au vrai processus. Le superviseur ne déclare
 * jamais un succès qu'il ne peut pas observer.
 *
 * FONCTIONNEMENT :
 * - start : échec AlreadyRunning si online/starting ; spawn via le launcher ;
 *   seulement si le spawn réussit, lifecycle=starting + start_time optimiste
 * - stop : échec NotRunning si offline/stopping ; signal d'arrêt gracieux ;
 *   lifecycle=stopping, start_time conservé jusqu'à confirmation heartbeat
 * - échec de spawn : état inchangé, erreur remontée à l'appelant (les effets
 *   de bord d'un lancement raté peuvent être partiels)
 * - ProcessLauncher = mécanisme plateforme opaque {spawn, stop, is_alive} ;
 *   implémentation concrète : session GNU screen par serveur + run.sh généré
 */

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::models::{LifecycleState, ServerEntry};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("server already running: {0}")]
    AlreadyRunning(String),
    #[error("server not running: {0}")]
    NotRunning(String),
    #[error("launch failed for {server_id}: {reason}")]
    Launch { server_id: String, reason: String },
    #[error("stop failed for {server_id}: {reason}")]
    Stop { server_id: String, reason: String },
}

/// Mécanisme de lancement plateforme, opaque pour le superviseur
pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, entry: &ServerEntry) -> Result<(), SupervisorError>;
    /// Signal d'arrêt gracieux ; l'arrêt effectif est confirmé par heartbeat
    fn stop(&self, entry: &ServerEntry) -> Result<(), SupervisorError>;
    fn is_alive(&self, entry: &ServerEntry) -> bool;
}

pub struct ProcessSupervisor {
    launcher: Arc<dyn ProcessLauncher>,
}

impl ProcessSupervisor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self { launcher }
    }

    /// Lance le processus d'un serveur et pose l'intention starting
    pub fn start(&self, entry: &ServerEntry) -> Result<(), SupervisorError> {
        {
            let rt = entry.runtime.lock();
            if matches!(rt.lifecycle, LifecycleState::Online | LifecycleState::Starting) {
                return Err(SupervisorError::AlreadyRunning(entry.server_id.clone()));
            }
        }
        // pas de verrou pendant le spawn : il peut être long
        self.launcher.spawn(entry)?;

        let mut rt = entry.runtime.lock();
        rt.lifecycle = LifecycleState::Starting;
        rt.start_time = Some(OffsetDateTime::now_utc());
        println!("[supervisor] start issued for '{}'", entry.server_id);
        Ok(())
    }

    /// Demande l'arrêt gracieux et pose l'intention stopping
    pub fn stop(&self, entry: &ServerEntry) -> Result<(), SupervisorError> {
        {
            let rt = entry.runtime.lock();
            if matches!(rt.lifecycle, LifecycleState::Offline | LifecycleState::Stopping) {
                return Err(SupervisorError::NotRunning(entry.server_id.clone()));
            }
        }
        self.launcher.stop(entry)?;

        let mut rt = entry.runtime.lock();
        rt.lifecycle = LifecycleState::Stopping;
        // start_time conservé : l'uptime reste lisible pendant l'arrêt
        println!("[supervisor] stop issued for '{}'", entry.server_id);
        Ok(())
    }

    pub fn is_alive(&self, entry: &ServerEntry) -> bool {
        self.launcher.is_alive(entry)
    }
}

/// Lanceur Linux : une session screen détachée par serveur.
/// Le script run.sh est généré au premier lancement avec les options
/// mémoire JVM de l'entrée.
pub struct ScreenLauncher {
    base_path: PathBuf,
}

impl ScreenLauncher {
    pub fn new(base_path: &Path) -> Self {
        Self { base_path: base_path.to_path_buf() }
    }

    /// Ex : ./running/static/Lobby/Lobby-1
    fn server_path(&self, entry: &ServerEntry) -> PathBuf {
        self.base_path.join(&entry.server_type).join(&entry.name)
    }

    fn screen_name(entry: &ServerEntry) -> &str {
        &entry.name
    }

    fn is_screen_running(name: &str) -> bool {
        match Command::new("screen").arg("-ls").output() {
            Ok(out) => String::from_utf8_lossy(&out.stdout).contains(name),
            Err(_) => false,
        }
    }

    fn ensure_run_script(&self, entry: &ServerEntry) -> std::io::Result<PathBuf> {
        let server_path = self.server_path(entry);
        fs::create_dir_all(&server_path)?;
        let run_sh = server_path.join("run.sh");
        if !run_sh.exists() {
            let mut f = fs::File::create(&run_sh)?;
            writeln!(f, "#!/bin/bash")?;
            writeln!(
                f,
                "screen -dmS {} java -Xmx{} -Xms{} -jar ./{}",
                Self::screen_name(entry),
                entry.java_memory.xmx,
                entry.java_memory.xms,
                entry.software
            )?;
            println!("[supervisor] run.sh created for '{}'", entry.server_id);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&run_sh, fs::Permissions::from_mode(0o755))?;
        }
        Ok(run_sh)
    }
}

impl ProcessLauncher for ScreenLauncher {
    fn spawn(&self, entry: &ServerEntry) -> Result<(), SupervisorError> {
        let name = Self::screen_name(entry);
        if Self::is_screen_running(name) {
            return Err(SupervisorError::Launch {
                server_id: entry.server_id.clone(),
                reason: format!("screen session '{name}' already exists"),
            });
        }

        let run_sh = self.ensure_run_script(entry).map_err(|e| SupervisorError::Launch {
            server_id: entry.server_id.clone(),
            reason: e.to_string(),
        })?;

        let status = Command::new(&run_sh)
            .current_dir(self.server_path(entry))
            .status()
            .map_err(|e| SupervisorError::Launch {
                server_id: entry.server_id.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(SupervisorError::Launch {
                server_id: entry.server_id.clone(),
                reason: format!("run.sh exited with {status}"),
            });
        }
        Ok(())
    }

    fn stop(&self, entry: &ServerEntry) -> Result<(), SupervisorError> {
        let name = Self::screen_name(entry);
        // envoie "stop" sur la console du serveur dans la session screen
        let status = Command::new("screen")
            .args(["-S", name, "-p", "0", "-X", "stuff", "stop\n"])
            .status()
            .map_err(|e| SupervisorError::Stop {
                server_id: entry.server_id.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(SupervisorError::Stop {
                server_id: entry.server_id.clone(),
                reason: format!("screen stuff exited with {status}"),
            });
        }
        Ok(())
    }

    fn is_alive(&self, entry: &ServerEntry) -> bool {
        Self::is_screen_running(Self::screen_name(entry))
    }
}
