//! Synchronized variable pair over bounded queues.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use async_trait::async_trait;
use tracing::trace;

use contracts::{
    AccessCapabilities, ContractError, DropPolicy, ProcessVariable, Sample, TransferElement,
    TransferElementId, UserType,
};

use crate::QueueConfig;

struct Outbound<T> {
    tx: Sender<Sample<T>>,
    policy: DropPolicy,
}

impl<T> Outbound<T> {
    /// Returns true if a value was discarded.
    fn push(&self, sample: Sample<T>, name: &str) -> Result<bool, ContractError> {
        let lost = match self.policy {
            DropPolicy::DropOldest => match self.tx.force_send(sample) {
                Ok(replaced) => replaced.is_some(),
                Err(_) => return Err(ContractError::channel_closed(name)),
            },
            DropPolicy::DropNewest => match self.tx.try_send(sample) {
                Ok(()) => false,
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => return Err(ContractError::channel_closed(name)),
            },
        };
        if lost {
            trace!(variable = %name, policy = ?self.policy, "queue full, value dropped");
        }
        Ok(lost)
    }
}

async fn pull<T>(rx: &Receiver<Sample<T>>, name: &str) -> Result<Sample<T>, ContractError> {
    rx.recv()
        .await
        .map_err(|_| ContractError::channel_closed(name))
}

fn try_pull<T>(rx: &Receiver<Sample<T>>, name: &str) -> Result<Option<Sample<T>>, ContractError> {
    match rx.try_recv() {
        Ok(sample) => Ok(Some(sample)),
        Err(TryRecvError::Empty) => Ok(None),
        Err(TryRecvError::Closed) => Err(ContractError::channel_closed(name)),
    }
}

fn no_return_channel(name: &str) -> ContractError {
    ContractError::logic(format!("'{name}' has no return channel"))
}

/// Writing half of a pair.
pub struct FeedingEnd<T> {
    name: String,
    id: TransferElementId,
    n_samples: usize,
    forward: Outbound<T>,
    back: Option<Receiver<Sample<T>>>,
}

/// Reading half of a pair.
pub struct ConsumingEnd<T> {
    name: String,
    id: TransferElementId,
    n_samples: usize,
    forward: Receiver<Sample<T>>,
    back: Option<Outbound<T>>,
}

/// Create a connected pair of endpoints.
///
/// With `with_return` the consuming end can write back and the feeding end
/// can read those values.
pub fn synchronized_pair<T: UserType>(
    name: &str,
    n_samples: usize,
    config: QueueConfig,
    with_return: bool,
) -> (FeedingEnd<T>, ConsumingEnd<T>) {
    let (tx, rx) = async_channel::bounded(config.capacity());
    let (back_tx, back_rx) = if with_return {
        let (tx, rx) = async_channel::bounded(config.capacity());
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let feeding = FeedingEnd {
        name: name.to_string(),
        id: TransferElementId::new(),
        n_samples,
        forward: Outbound {
            tx,
            policy: config.drop_policy,
        },
        back: back_rx,
    };
    let consuming = ConsumingEnd {
        name: name.to_string(),
        id: TransferElementId::new(),
        n_samples,
        forward: rx,
        back: back_tx.map(|tx| Outbound {
            tx,
            policy: config.drop_policy,
        }),
    };
    (feeding, consuming)
}

impl<T: UserType> TransferElement for FeedingEnd<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> TransferElementId {
        self.id
    }

    fn capabilities(&self) -> AccessCapabilities {
        AccessCapabilities {
            readable: self.back.is_some(),
            writeable: true,
            with_return: self.back.is_some(),
        }
    }

    fn n_samples(&self) -> usize {
        self.n_samples
    }
}

#[async_trait]
impl<T: UserType> ProcessVariable<T> for FeedingEnd<T> {
    async fn read(&mut self) -> Result<Sample<T>, ContractError> {
        match &self.back {
            Some(rx) => pull(rx, &self.name).await,
            None => Err(no_return_channel(&self.name)),
        }
    }

    fn read_non_blocking(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        match &self.back {
            Some(rx) => try_pull(rx, &self.name),
            None => Err(no_return_channel(&self.name)),
        }
    }

    fn write(&mut self, sample: Sample<T>) -> Result<bool, ContractError> {
        self.forward.push(sample, &self.name)
    }
}

impl<T: UserType> TransferElement for ConsumingEnd<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> TransferElementId {
        self.id
    }

    fn capabilities(&self) -> AccessCapabilities {
        AccessCapabilities {
            readable: true,
            writeable: self.back.is_some(),
            with_return: self.back.is_some(),
        }
    }

    fn n_samples(&self) -> usize {
        self.n_samples
    }
}

#[async_trait]
impl<T: UserType> ProcessVariable<T> for ConsumingEnd<T> {
    async fn read(&mut self) -> Result<Sample<T>, ContractError> {
        pull(&self.forward, &self.name).await
    }

    fn read_non_blocking(&mut self) -> Result<Option<Sample<T>>, ContractError> {
        try_pull(&self.forward, &self.name)
    }

    fn write(&mut self, sample: Sample<T>) -> Result<bool, ContractError> {
        match &self.back {
            Some(back) => back.push(sample, &self.name),
            None => Err(ContractError::logic(format!(
                "'{}' is read-only",
                self.name
            ))),
        }
    }
}
