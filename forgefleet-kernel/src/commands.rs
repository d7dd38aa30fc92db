/**
 * COMMANDS - Table de commandes opérateur
 *
 * RÔLE :
 * Dispatch console : mapping nom -> handler, rempli à l'initialisation.
 * Chaque handler implémente la même capacité execute(ctx, args) ; une
 * nouvelle commande s'ajoute par enregistrement, pas par héritage.
 *
 * FONCTIONNEMENT :
 * - tokenization shell-words (quotes supportées)
 * - une erreur de handler est affichée et la session continue
 * - la console reste volontairement minimale : ni complétion ni TTY riche
 */

use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::models::ServerEntry;
use crate::registry::ServerRegistry;
use crate::supervisor::{ProcessSupervisor, SupervisorError};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0} (try 'help')")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error("unparseable input: {0}")]
    Parse(String),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Dépendances partagées par tous les handlers
pub struct CommandContext {
    pub registry: Arc<ServerRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
}

pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;
    fn usage(&self) -> &'static str;
    fn describe(&self) -> &'static str;
    fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<String, CommandError>;
}

pub struct CommandRegistry {
    commands: HashMap<&'static str, Box<dyn Command>>,
    /// ordre d'enregistrement, pour un help stable
    order: Vec<&'static str>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self { commands: HashMap::new(), order: Vec::new() }
    }

    /// Table par défaut du kernel
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ServersCommand));
        registry.register(Box::new(StatusCommand));
        registry.register(Box::new(StartCommand));
        registry.register(Box::new(StopCommand));
        registry.register(Box::new(PlayersCommand));
        registry
    }

    pub fn register(&mut self, command: Box<dyn Command>) {
        let name = command.name();
        if self.commands.insert(name, command).is_none() {
            self.order.push(name);
        }
    }

    /// Parse une ligne opérateur et exécute le handler correspondant.
    /// Ligne vide => Ok vide ; "help" est résolu sur la table elle-même.
    pub fn dispatch(&self, ctx: &CommandContext, line: &str) -> Result<String, CommandError> {
        let words = shell_words::split(line).map_err(|e| CommandError::Parse(e.to_string()))?;
        let Some((name, args)) = words.split_first() else {
            return Ok(String::new());
        };
        let name = name.to_ascii_lowercase();
        if name == "help" {
            return Ok(self.help_text());
        }
        match self.commands.get(name.as_str()) {
            Some(command) => command.execute(ctx, args),
            None => Err(CommandError::Unknown(name)),
        }
    }

    pub fn help_text(&self) -> String {
        let mut out = String::from("Available commands:\n");
        for name in &self.order {
            let cmd = &self.commands[name];
            out.push_str(&format!(" - {:<18} {}\n", cmd.usage(), cmd.describe()));
        }
        out.push_str(&format!(" - {:<18} {}", "help", "show this help"));
        out
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn resolve<'a>(
    ctx: &'a CommandContext,
    args: &[String],
    usage: &'static str,
) -> Result<Arc<ServerEntry>, CommandError> {
    let id = args.first().ok_or(CommandError::Usage(usage))?;
    ctx.registry.get(id).ok_or_else(|| CommandError::UnknownServer(id.clone()))
}

struct ServersCommand;

impl Command for ServersCommand {
    fn name(&self) -> &'static str {
        "servers"
    }
    fn usage(&self) -> &'static str {
        "servers"
    }
    fn describe(&self) -> &'static str {
        "list all registered servers"
    }

    fn execute(&self, ctx: &CommandContext, _args: &[String]) -> Result<String, CommandError> {
        let entries = ctx.registry.list();
        if entries.is_empty() {
            return Ok("no servers registered".into());
        }
        let mut out = format!("{} server(s):\n", entries.len());
        for entry in entries {
            let rt = entry.runtime.lock();
            out.push_str(&format!(
                " - {:<16} {:<10} {} ({})\n",
                entry.server_id,
                rt.lifecycle.to_string(),
                entry.address(),
                entry.server_type
            ));
        }
        out.pop();
        Ok(out)
    }
}

struct StatusCommand;

impl Command for StatusCommand {
    fn name(&self) -> &'static str {
        "status"
    }
    fn usage(&self) -> &'static str {
        "status <server>"
    }
    fn describe(&self) -> &'static str {
        "show runtime state of one server"
    }

    fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<String, CommandError> {
        let entry = resolve(ctx, args, self.usage())?;
        let rt = entry.runtime.lock();
        let now = OffsetDateTime::now_utc();

        let metrics = match rt.metrics {
            Some(m) => format!("tps {} | cpu {}% | ram {} MB", m.tps, m.cpu_usage, m.ram_usage_mb),
            None => "no metrics reported yet".into(),
        };
        let uptime = rt
            .uptime_seconds(now)
            .map(|s| format!("{s}s"))
            .unwrap_or_else(|| "-".into());

        Ok(format!(
            "{} ({})\n  state     {}\n  connected {}\n  address   {}\n  players   {}/{}\n  {}\n  uptime    {}",
            entry.name,
            entry.server_id,
            rt.lifecycle,
            rt.connected,
            entry.address(),
            rt.players_online.len(),
            rt.max_players,
            metrics,
            uptime
        ))
    }
}

struct StartCommand;

impl Command for StartCommand {
    fn name(&self) -> &'static str {
        "start"
    }
    fn usage(&self) -> &'static str {
        "start <server>"
    }
    fn describe(&self) -> &'static str {
        "launch the server process"
    }

    fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<String, CommandError> {
        let entry = resolve(ctx, args, self.usage())?;
        ctx.supervisor.start(&entry)?;
        Ok(format!("start issued for '{}'", entry.server_id))
    }
}

struct StopCommand;

impl Command for StopCommand {
    fn name(&self) -> &'static str {
        "stop"
    }
    fn usage(&self) -> &'static str {
        "stop <server>"
    }
    fn describe(&self) -> &'static str {
        "stop the server gracefully"
    }

    fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<String, CommandError> {
        let entry = resolve(ctx, args, self.usage())?;
        ctx.supervisor.stop(&entry)?;
        Ok(format!("stop issued for '{}'", entry.server_id))
    }
}

struct PlayersCommand;

impl Command for PlayersCommand {
    fn name(&self) -> &'static str {
        "players"
    }
    fn usage(&self) -> &'static str {
        "players <server>"
    }
    fn describe(&self) -> &'static str {
        "list players online on a server"
    }

    fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<String, CommandError> {
        let entry = resolve(ctx, args, self.usage())?;
        let rt = entry.runtime.lock();
        if rt.players_online.is_empty() {
            return Ok(format!("no players on '{}'", entry.server_id));
        }
        let names: Vec<&str> = rt.players_online.iter().map(String::as_str).collect();
        Ok(format!(
            "{}/{} on '{}': {}",
            rt.players_online.len(),
            rt.max_players,
            entry.server_id,
            names.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConf;
    use crate::models::ServerEntry;
    use crate::supervisor::ProcessLauncher;
    use std::path::PathBuf;

    struct NoopLauncher;

    impl ProcessLauncher for NoopLauncher {
        fn spawn(&self, _entry: &ServerEntry) -> Result<(), SupervisorError> {
            Ok(())
        }
        fn stop(&self, _entry: &ServerEntry) -> Result<(), SupervisorError> {
            Ok(())
        }
        fn is_alive(&self, _entry: &ServerEntry) -> bool {
            false
        }
    }

    fn ctx_with(ids: &[&str]) -> CommandContext {
        let registry = Arc::new(ServerRegistry::new());
        for id in ids {
            let conf: ServerConf = serde_yaml::from_str("{}").unwrap();
            registry
                .register(ServerEntry::from_conf(id, conf, PathBuf::from(format!("{id}.yml"))))
                .unwrap();
        }
        CommandContext {
            registry,
            supervisor: Arc::new(ProcessSupervisor::new(Arc::new(NoopLauncher))),
        }
    }

    #[test]
    fn unknown_command_is_reported() {
        let ctx = ctx_with(&[]);
        let registry = CommandRegistry::with_defaults();
        assert!(matches!(
            registry.dispatch(&ctx, "frobnicate now"),
            Err(CommandError::Unknown(name)) if name == "frobnicate"
        ));
    }

    #[test]
    fn empty_line_is_a_noop() {
        let ctx = ctx_with(&[]);
        let registry = CommandRegistry::with_defaults();
        assert_eq!(registry.dispatch(&ctx, "   ").unwrap(), "");
    }

    #[test]
    fn servers_lists_fleet() {
        let ctx = ctx_with(&["lobby-1", "game-1"]);
        let registry = CommandRegistry::with_defaults();
        let out = registry.dispatch(&ctx, "servers").unwrap();
        assert!(out.contains("lobby-1"));
        assert!(out.contains("game-1"));
    }

    #[test]
    fn start_then_stop_through_dispatch() {
        let ctx = ctx_with(&["s1"]);
        let registry = CommandRegistry::with_defaults();

        registry.dispatch(&ctx, "start s1").unwrap();
        let entry = ctx.registry.get("s1").unwrap();
        assert_eq!(entry.runtime.lock().lifecycle, crate::models::LifecycleState::Starting);

        // start répété refusé, la table remonte l'erreur du superviseur
        assert!(matches!(
            registry.dispatch(&ctx, "start s1"),
            Err(CommandError::Supervisor(SupervisorError::AlreadyRunning(_)))
        ));

        registry.dispatch(&ctx, "stop s1").unwrap();
        assert_eq!(entry.runtime.lock().lifecycle, crate::models::LifecycleState::Stopping);
    }

    #[test]
    fn status_requires_a_known_server() {
        let ctx = ctx_with(&["s1"]);
        let registry = CommandRegistry::with_defaults();
        assert!(matches!(registry.dispatch(&ctx, "status"), Err(CommandError::Usage(_))));
        assert!(matches!(
            registry.dispatch(&ctx, "status ghost"),
            Err(CommandError::UnknownServer(id)) if id == "ghost"
        ));
        assert!(registry.dispatch(&ctx, "status s1").unwrap().contains("offline"));
    }

    #[test]
    fn help_lists_registered_commands() {
        let ctx = ctx_with(&[]);
        let registry = CommandRegistry::with_defaults();
        let help = registry.dispatch(&ctx, "help").unwrap();
        for name in ["servers", "status", "start", "stop", "players", "help"] {
            assert!(help.contains(name), "missing {name} in help");
        }
    }
}
