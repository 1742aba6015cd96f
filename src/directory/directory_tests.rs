use std::time::Duration;

use super::*;

#[tokio::test]
async fn stalled_store_call_times_out() {
    let stalled = std::future::pending::<Result<(), DirectoryError>>();
    let err = with_deadline(Duration::from_millis(20), stalled).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Timeout(d) if d == Duration::from_millis(20)));
}

#[tokio::test]
async fn finished_calls_pass_through() {
    let value = with_deadline(Duration::from_secs(1), async { Ok::<_, DirectoryError>(7) }).await.unwrap();
    assert_eq!(value, 7);
    let err = with_deadline(Duration::from_secs(1), async { Err::<(), _>(DirectoryError::ProgramNotFound) }).await.unwrap_err();
    assert!(matches!(err, DirectoryError::ProgramNotFound));
}
