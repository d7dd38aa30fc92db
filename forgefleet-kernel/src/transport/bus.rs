/**
 * TRANSPORT BUS - Variante MQTT partagée
 *
 * RÔLE :
 * Un seul canal broker pour toute la flotte : le kernel s'abonne au topic
 * flotte, démultiplexe l'entrant par le champ server_id du payload, et
 * publie le sortant sur un topic par serveur (plus un topic broadcast).
 *
 * FONCTIONNEMENT :
 * - pas d'auth par message : la confiance est établie à la connexion broker
 *   (question ouverte assumée, cf. DESIGN.md)
 * - reconnexion : backoff 2s puis resouscription sur ConnAck
 * - une fois la souscription acquittée, chaque serveur enregistré est
 *   considéré connecté (événement Connected émis pour toute la flotte)
 */

use rumqttc::{AsyncClient, Event, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task;

use super::{EventReceiver, EventSender, HeartbeatTransport, TransportError, TransportEvent};
use crate::config::MqttConf;

/// Topic flotte sur lequel tous les serveurs publient leurs réponses
pub const FLEET_TOPIC: &str = "forgefleet/servers/heartbeat";
/// Topic écouté par tous les serveurs à la fois
pub const BROADCAST_TOPIC: &str = "forgefleet/servers/broadcast";

/// Topic sortant propre à un serveur
pub fn server_topic(server_id: &str) -> String {
    format!("forgefleet/servers/{server_id}/heartbeat")
}

/// Extrait le server_id d'une trame du topic flotte.
/// Trame sans champ server_id => None, elle sera loggée puis ignorée.
pub fn frame_server_id(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value.get("server_id").and_then(|v| v.as_str()).map(str::to_string)
}

pub struct BusTransport {
    client: AsyncClient,
}

impl BusTransport {
    /// Connecte le client MQTT et démarre la task d'écoute.
    /// `server_ids` sert uniquement à émettre Connected pour la flotte
    /// une fois la souscription acquittée.
    pub fn spawn(conf: &MqttConf, server_ids: Vec<String>) -> (Arc<Self>, EventReceiver) {
        let mut opts = MqttOptions::new("forgefleet-kernel", &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 32);
        let (tx, rx) = mpsc::unbounded_channel();

        let listener_client = client.clone();
        task::spawn(async move {
            if let Err(e) = listener_client.subscribe(FLEET_TOPIC, QoS::AtLeastOnce).await {
                eprintln!("[transport] bus subscribe failed: {e:?}");
                return;
            }

            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(rumqttc::Incoming::SubAck(_))) => {
                        println!("[transport] bus subscribed to {FLEET_TOPIC}");
                        emit_connected(&tx, &server_ids);
                    }
                    Ok(Event::Incoming(rumqttc::Incoming::ConnAck(_))) => {
                        // reconnexion : la souscription ne survit pas côté broker
                        if let Err(e) =
                            listener_client.try_subscribe(FLEET_TOPIC, QoS::AtLeastOnce)
                        {
                            eprintln!("[transport] bus resubscribe failed: {e:?}");
                        }
                    }
                    Ok(Event::Incoming(rumqttc::Incoming::Publish(p)))
                        if p.topic == FLEET_TOPIC =>
                    {
                        let Ok(payload) = String::from_utf8(p.payload.to_vec()) else {
                            eprintln!("[transport] bus frame is not utf-8, dropped");
                            continue;
                        };
                        match frame_server_id(&payload) {
                            Some(server_id) => {
                                let _ = tx.send(TransportEvent::Message { server_id, payload });
                            }
                            None => {
                                eprintln!("[transport] bus frame without server_id: {payload}")
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        eprintln!("[transport] bus error: {e:?}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        (Arc::new(Self { client }), rx)
    }

    /// Publie une trame sur le topic broadcast de la flotte
    pub fn broadcast(&self, payload: &str) -> Result<(), TransportError> {
        self.client
            .try_publish(BROADCAST_TOPIC, QoS::AtLeastOnce, false, payload)
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}

fn emit_connected(tx: &EventSender, server_ids: &[String]) {
    for server_id in server_ids {
        let _ = tx.send(TransportEvent::Connected { server_id: server_id.clone() });
    }
}

impl HeartbeatTransport for BusTransport {
    fn send(&self, server_id: &str, payload: &str) -> Result<(), TransportError> {
        self.client
            .try_publish(server_topic(server_id), QoS::AtLeastOnce, false, payload)
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    fn label(&self) -> &'static str {
        "bus"
    }
}
