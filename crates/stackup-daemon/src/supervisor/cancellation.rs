use tokio::sync::watch;

#[derive(Clone)]
pub struct CancellationToken {
    receiver: watch::Receiver<bool>,
}

/// Owning side of a [`CancellationToken`]. Dropping it without calling
/// [`CancelHandle::cancel`] leaves the tokens uncancelled forever.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            receiver: self.sender.subscribe(),
        }
    }
}

impl CancellationToken {
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { sender: tx }, Self { receiver: rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    pub async fn cancelled(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        let (_, rx) = watch::channel(false);
        Self { receiver: rx }
    }
}
