//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements           | Connects to              |
//! |------------|----------------------|--------------------------|
//! | `log_sink` | ConnectivityListener | Serial log output        |
//! | `mqtt`     | PubSubTransport      | esp-mqtt client          |
//! | `nvs`      | StoragePort          | NVS / in-memory store    |
//! | `wifi`     | StationRadio         | ESP-IDF WiFi STA         |
//! |            |                      | Wi-Fi / IP event loop    |

pub mod log_sink;
pub mod mqtt;
pub mod nvs;
pub mod wifi;
