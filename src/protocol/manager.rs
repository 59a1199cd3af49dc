//! Manager Service Object
//!
//! The node's default business object, registered with the RPC collaborator at startup. It lets
//! peers announce and retire servers and post messages; every call becomes an event on the
//! dispatcher's queues, so the manager never touches membership itself.
//!
//! | Method     | Payload (bincode)   | Result (bincode)          |
//! |------------|---------------------|---------------------------|
//! | `Register` | `ServerDescriptor`  | `()`                      |
//! | `Remove`   | `ServerId`          | `()`                      |
//! | `Notify`   | `InboundMessage`    | `()`                      |
//! | `Members`  | none                | `Vec<ServerDescriptor>`   |

use super::rpc::{CallFuture, ServiceObject};
use crate::dispatch::queue::EventProducer;
use crate::dispatch::types::InboundMessage;
use crate::membership::types::{ServerDescriptor, ServerId};

use anyhow::Result;

pub const MANAGER_SERVICE: &str = "Manager";

pub const METHOD_REGISTER: &str = "Register";
pub const METHOD_REMOVE: &str = "Remove";
pub const METHOD_NOTIFY: &str = "Notify";
pub const METHOD_MEMBERS: &str = "Members";

pub struct Manager {
    producer: EventProducer,
}

impl Manager {
    pub fn new(producer: EventProducer) -> Self {
        Self { producer }
    }
}

impl ServiceObject for Manager {
    fn name(&self) -> &str {
        MANAGER_SERVICE
    }

    fn call(&self, method: &str, payload: Vec<u8>) -> CallFuture {
        let producer = self.producer.clone();
        let method = method.to_string();

        Box::pin(async move { handle_call(&producer, &method, &payload).await })
    }
}

async fn handle_call(producer: &EventProducer, method: &str, payload: &[u8]) -> Result<Vec<u8>> {
    match method {
        METHOD_REGISTER => {
            let descriptor: ServerDescriptor = bincode::deserialize(payload)?;
            tracing::debug!("Manager: register request for {}", descriptor);
            producer.register(descriptor).await?;
            Ok(bincode::serialize(&())?)
        }

        METHOD_REMOVE => {
            let id: ServerId = bincode::deserialize(payload)?;
            tracing::debug!("Manager: remove request for {}", id);
            producer.remove(id).await?;
            Ok(bincode::serialize(&())?)
        }

        METHOD_NOTIFY => {
            let message: InboundMessage = bincode::deserialize(payload)?;
            producer.push_message(message).await?;
            Ok(bincode::serialize(&())?)
        }

        METHOD_MEMBERS => {
            let members = producer.members().await?;
            Ok(bincode::serialize(&members)?)
        }

        other => Err(anyhow::anyhow!("Unknown Manager method: {}", other)),
    }
}
