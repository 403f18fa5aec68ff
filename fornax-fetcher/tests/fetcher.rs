use std::{sync::Arc, time::Duration};

use fornax_fetcher::{CancellationToken, FetchError, FetchOptions, RangeFetcher};
use fornax_index::{ArrayLayout, DataType, Index};
use fornax_object_storage::{
    RemoteObjectRef, StorageError,
    testing::{CountingReader, FailureMode},
};
use fornax_planner::{PlannerOptions, RangePlan, SubsetRequest, plan};

/// 8x8 u8 image at offset 0, first two columns: eight 2-byte ranges at
/// offsets 0, 8, .., 56.
fn column_plan() -> RangePlan {
    let index = Index::new().with_array("img", ArrayLayout::contiguous(DataType::U8, vec![8, 8], 0));
    let request = SubsetRequest::new("img").all().pixels(0..2);
    plan(&index, &request, &PlannerOptions { min_gap_bytes: 0 }).unwrap()
}

fn quick_options() -> FetchOptions {
    FetchOptions {
        max_in_flight: 4,
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        read_timeout: Duration::from_secs(5),
        deadline: None,
    }
}

async fn setup() -> (Arc<CountingReader>, RemoteObjectRef) {
    let reader = Arc::new(CountingReader::new());
    let object = reader.put("img.bin", (0..64).collect()).await;
    (reader, object)
}

#[tokio::test]
async fn fetches_every_planned_range() -> anyhow::Result<()> {
    let (reader, object) = setup().await;
    let plan = column_plan();
    assert_eq!(plan.entries.len(), 8);

    let fetcher = RangeFetcher::new(reader.clone(), quick_options());
    let fetched = fetcher.fetch(&object, &plan, &CancellationToken::new()).await?;

    let mut ranges = fetched.ranges;
    ranges.sort_by_key(|r| r.offset);
    for (row, range) in ranges.iter().enumerate() {
        let start = row as u8 * 8;
        assert_eq!(range.range(), start as u64..start as u64 + 2);
        assert_eq!(range.bytes.as_ref(), &[start, start + 1]);
    }
    assert_eq!(fetched.stats.requests, 8);
    assert_eq!(fetched.stats.attempts, 8);
    assert_eq!(fetched.stats.bytes_fetched, 16);
    assert_eq!(reader.read_count(), 8);
    Ok(())
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let (reader, object) = setup().await;
    reader.set_read_delay(Duration::from_millis(20));
    let options = FetchOptions {
        max_in_flight: 3,
        ..quick_options()
    };

    RangeFetcher::new(reader.clone(), options)
        .fetch(&object, &column_plan(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(reader.peak_in_flight() <= 3);
    assert!(reader.peak_in_flight() > 1, "reads should overlap");
}

#[tokio::test]
async fn exhausting_retries_fails_the_whole_fetch() {
    let (reader, object) = setup().await;
    reader.fail_reads_at(16, FailureMode::Always);

    let err = RangeFetcher::new(reader.clone(), quick_options())
        .fetch(&object, &column_plan(), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        FetchError::RangeFetchFailed {
            offset,
            length,
            attempts,
            cause,
        } => {
            assert_eq!((offset, length), (16, 2));
            assert_eq!(attempts, 4);
            assert!(cause.is_transient());
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(reader.attempts_at(16), 4);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let (reader, object) = setup().await;
    reader.fail_reads_at(24, FailureMode::Times(2));

    let fetched = RangeFetcher::new(reader.clone(), quick_options())
        .fetch(&object, &column_plan(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fetched.ranges.len(), 8);
    assert_eq!(fetched.stats.attempts, 10);
    assert_eq!(reader.attempts_at(24), 3);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let (reader, object) = setup().await;
    reader.fail_reads_at(0, FailureMode::Permanent);

    let err = RangeFetcher::new(reader.clone(), quick_options())
        .fetch(&object, &column_plan(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FetchError::RangeFetchFailed {
            offset: 0,
            attempts: 1,
            ..
        }
    ));
    assert_eq!(reader.attempts_at(0), 1);
}

#[tokio::test]
async fn stalled_reads_time_out_and_are_retried() {
    let (reader, object) = setup().await;
    reader.fail_reads_at(8, FailureMode::Hang);
    let options = FetchOptions {
        max_retries: 1,
        read_timeout: Duration::from_millis(30),
        ..quick_options()
    };

    let err = RangeFetcher::new(reader.clone(), options)
        .fetch(&object, &column_plan(), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        FetchError::RangeFetchFailed {
            attempts, cause, ..
        } => {
            assert_eq!(attempts, 2);
            assert!(matches!(cause, StorageError::ReadTimeout { .. }));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn cancellation_abandons_in_flight_reads() {
    let (reader, object) = setup().await;
    reader.fail_reads_at(8, FailureMode::Hang);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = RangeFetcher::new(reader.clone(), quick_options())
        .fetch(&object, &column_plan(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Cancelled));

    // Already cancelled: nothing is read.
    let (reader, object) = setup().await;
    let err = RangeFetcher::new(reader.clone(), quick_options())
        .fetch(&object, &column_plan(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Cancelled));
    assert_eq!(reader.read_count(), 0);
}

#[tokio::test]
async fn deadline_bounds_the_whole_fetch() {
    let (reader, object) = setup().await;
    reader.fail_reads_at(40, FailureMode::Hang);
    let options = FetchOptions {
        deadline: Some(Duration::from_millis(50)),
        ..quick_options()
    };

    let err = RangeFetcher::new(reader.clone(), options)
        .fetch(&object, &column_plan(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FetchError::DeadlineExceeded { deadline } if deadline == Duration::from_millis(50)
    ));
}

#[tokio::test]
async fn ranges_beyond_the_object_are_refused() {
    let reader = Arc::new(CountingReader::new());
    let object = reader.put("short.bin", vec![0; 32]).await;

    let err = RangeFetcher::new(reader.clone(), quick_options())
        .fetch(&object, &column_plan(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FetchError::RangeOutsideObject {
            offset: 32,
            object_size: 32,
            ..
        }
    ));
    assert_eq!(reader.read_count(), 0);
}
