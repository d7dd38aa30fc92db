/*!
ForgeFleet kernel : plan de contrôle d'une flotte de serveurs de jeu.

Registry + Heartbeat Engine + superviseur de processus + API REST/WS,
derrière un transport heartbeat interchangeable (websocket direct ou bus MQTT).
*/

pub mod auth;
pub mod commands;
pub mod config;
pub mod heartbeat;
pub mod http;
pub mod models;
pub mod registry;
pub mod sessions;
pub mod storage;
pub mod supervisor;
pub mod transport;
