//! Scenario test for the `Mutation` operation variant (spec §8 scenario
//! 5, "Mutation retry-latest").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use query_core::context::Context;
use query_core::continuation::Continuation;
use query_core::error::CoreError;
use query_core::operation::{MutationOperation, MutationRequest, Operation};
use query_core::path::Path;
use query_core::state::mutation::MutationState;
use query_core::store::Store;

struct CountingMutation {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl MutationRequest for CountingMutation {
    type Args = String;
    type Value = String;
    type Error = String;

    fn path(&self) -> Path {
        Path::new(["mutate-q"])
    }

    async fn mutate(
        &self,
        args: String,
        _ctx: Context,
        _continuation: Continuation<String, String>,
    ) -> Result<String, CoreError<String>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("V{}-{args}", n + 1))
    }
}

#[tokio::test]
async fn retry_latest_reuses_arguments_and_advances_history() {
    let calls = Arc::new(AtomicUsize::new(0));
    let request = Arc::new(CountingMutation { calls: calls.clone() });
    let op: Arc<dyn Operation<String, String>> = Arc::new(MutationOperation(request));
    let store = Store::new(op, Context::new(), MutationState::<String, String, String>::new()).await;

    let v1 = store.mutate("A1".to_string()).await.unwrap();
    assert_eq!(v1, "V1-A1");
    assert_eq!(
        store.with_exclusive_access(|s| s.current_value().cloned()),
        Some("V1-A1".to_string())
    );

    let v2 = store.retry_latest().await.unwrap();
    assert_eq!(v2, "V2-A1");

    let history = store.with_exclusive_access(|s| s.history().to_vec());
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|entry| entry.arguments == "A1"));

    assert_eq!(
        store.with_exclusive_access(|s| s.current_value().cloned()),
        Some("V2-A1".to_string())
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_latest_with_no_prior_call_fails_with_no_arguments() {
    let request = Arc::new(CountingMutation {
        calls: Arc::new(AtomicUsize::new(0)),
    });
    let op: Arc<dyn Operation<String, String>> = Arc::new(MutationOperation(request));
    let store = Store::new(op, Context::new(), MutationState::<String, String, String>::new()).await;

    let err = store.retry_latest().await.unwrap_err();
    assert!(matches!(err, CoreError::NoArguments));
}
