/*!
# ForgeFleet DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement autour du kernel ForgeFleet avec:
- Stub de transport heartbeat pour tests sans websocket ni broker
- Harness de scénarios flotte (register/start/heartbeat/assertions)
*/

pub mod harness;
pub mod transport_stub;

pub use harness::FleetHarness;
pub use transport_stub::StubTransport;
