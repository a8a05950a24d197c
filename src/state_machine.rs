//! A small `watch`-backed state machine, used to coordinate phase
//! transitions between the bridge's backfill/listening phases and anything
//! awaiting them (the dispatcher, the HTTP control API, tests).

use tokio::sync::watch;

/// Cheaply cloneable handle onto a single piece of state shared between
/// producers and any number of awaiters.
#[derive(Clone)]
pub struct StateMachine<S> {
    tx: watch::Sender<S>,
}

impl<S: Clone + PartialEq + Send + Sync + 'static> StateMachine<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> S {
        self.tx.borrow().clone()
    }

    pub fn set(&self, state: S) {
        self.tx.send_replace(state);
    }

    /// Resolves immediately if `predicate` already matches the current
    /// state, otherwise waits for the next transition that does.
    pub async fn transitioned_to(&self, predicate: impl Fn(&S) -> bool) {
        let mut rx = self.tx.subscribe();
        if predicate(&rx.borrow()) {
            return;
        }
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            if predicate(&rx.borrow()) {
                return;
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    enum Phase {
        Backfilling,
        Listening,
    }

    #[tokio::test]
    async fn transitioned_to_resolves_immediately_on_match() {
        let machine = StateMachine::new(Phase::Listening);
        tokio::time::timeout(
            std::time::Duration::from_millis(50),
            machine.transitioned_to(|s| *s == Phase::Listening),
        )
        .await
        .expect("should resolve without waiting");
    }

    #[tokio::test]
    async fn transitioned_to_waits_for_a_future_transition() {
        let machine = StateMachine::new(Phase::Backfilling);
        let waiter = machine.clone();
        let handle = tokio::spawn(async move {
            waiter.transitioned_to(|s| *s == Phase::Listening).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        machine.set(Phase::Listening);

        tokio::time::timeout(std::time::Duration::from_millis(100), handle)
            .await
            .expect("waiter should complete")
            .unwrap();
    }

    #[tokio::test]
    async fn current_reflects_latest_set_state() {
        let machine = StateMachine::new(Phase::Backfilling);
        assert_eq!(machine.current(), Phase::Backfilling);
        machine.set(Phase::Listening);
        assert_eq!(machine.current(), Phase::Listening);
    }
}
