use std::collections::HashMap;
use std::time::Duration;

use api::{ApiError, PushConfigOptions, WatchLogsOptions};
use common::cid::Cid;
use common::job::{JobId, JobStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::common::*;

mod jobs {
    use super::*;

    #[tokio::test]
    async fn concurrent_pushes_never_regress_from_a_final_state() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let a = env.add(&payload(4000, 10)).await;
        let b = env.add(&payload(4000, 11)).await;

        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let watcher = {
            let instance = instance.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { instance.watch_jobs(cancel, tx, &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (ja, jb) = tokio::join!(
            push(&instance, with_tiers(a, true, true), false),
            push(&instance, with_tiers(b, true, false), false),
        );

        let mut seen: HashMap<JobId, Vec<JobStatus>> = HashMap::new();
        let mut finished = 0;
        while finished < 2 {
            let job = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let history = seen.entry(job.id.clone()).or_default();
            assert!(
                history.last().is_none_or(|prev| !prev.is_final()),
                "{} moved from a final state to {}",
                job.id,
                job.status
            );
            history.push(job.status);
            if job.status.is_final() {
                finished += 1;
            }
        }

        for jid in [ja, jb] {
            assert_eq!(
                seen[&jid],
                vec![JobStatus::Queued, JobStatus::Executing, JobStatus::Success]
            );
        }

        cancel.cancel();
        assert!(watcher.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn requested_jobs_replay_current_state_first() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let cid = env.add(b"replayed").await;
        let jid = push(&instance, with_tiers(cid, true, false), false).await;
        wait_final(&instance, &jid).await;

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let watcher = {
            let instance = instance.clone();
            let cancel = cancel.clone();
            let jids = vec![jid.clone(), JobId::new()];
            tokio::spawn(async move { instance.watch_jobs(cancel, tx, &jids).await })
        };

        let replayed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed.id, jid);
        assert_eq!(replayed.status, JobStatus::Success);

        cancel.cancel();
        assert!(watcher.await.unwrap().is_ok());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn replay_to_a_full_sink_drops_instead_of_blocking() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let mut jids = Vec::new();
        for i in 0..3u8 {
            let cid = env.add(&[i; 64]).await;
            let jid = push(&instance, with_tiers(cid, true, false), false).await;
            wait_final(&instance, &jid).await;
            jids.push(jid);
        }

        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let watcher = {
            let instance = instance.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { instance.watch_jobs(cancel, tx, &jids).await })
        };

        // Replay must not wait for the receiver.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let res = tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 1);
    }

    #[tokio::test]
    async fn other_instances_jobs_are_not_delivered() {
        let env = TestEnv::new();
        let mine = env.instance().await;
        let theirs = env.instance().await;

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let watcher = {
            let mine = mine.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { mine.watch_jobs(cancel, tx, &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let other_cid = env.add(b"theirs").await;
        let other = push(&theirs, with_tiers(other_cid, true, false), false).await;
        wait_final(&theirs, &other).await;
        let my_cid = env.add(b"mine").await;
        let own = push(&mine, with_tiers(my_cid, true, false), false).await;

        loop {
            let job = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(job.id, own);
            assert_eq!(&job.api_id, mine.id());
            if job.status.is_final() {
                break;
            }
        }

        cancel.cancel();
        assert!(watcher.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn close_ends_running_watches_and_refuses_new_ones() {
        let env = TestEnv::new();
        let instance = env.instance().await;

        let (tx, _rx) = mpsc::channel(1);
        let watcher = {
            let instance = instance.clone();
            tokio::spawn(async move { instance.watch_jobs(CancellationToken::new(), tx, &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        instance.close();
        let res = tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());

        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            instance.watch_jobs(CancellationToken::new(), tx, &[]).await,
            Err(ApiError::Closed)
        ));
    }
}

mod logs {
    use super::*;

    #[tokio::test]
    async fn unmanaged_cid_is_not_found() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let (tx, _rx) = mpsc::channel(1);
        let err = instance
            .watch_logs(
                CancellationToken::new(),
                tx,
                &Cid::raw(b"unmanaged"),
                WatchLogsOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn entries_are_filtered_by_cid_and_job() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let cid = env.add(&payload(3000, 12)).await;
        let other = env.add(&payload(3000, 13)).await;

        let first = push(&instance, with_tiers(cid, true, false), false).await;
        wait_final(&instance, &first).await;

        let spawn_watch = |opts: WatchLogsOptions| {
            let (tx, rx) = mpsc::channel(64);
            let instance = instance.clone();
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let handle =
                tokio::spawn(async move { instance.watch_logs(token, tx, &cid, opts).await });
            (handle, cancel, rx)
        };
        let (by_cid, cancel_cid, mut cid_rx) = spawn_watch(WatchLogsOptions::new());
        let (by_job, cancel_job, mut job_rx) =
            spawn_watch(WatchLogsOptions::new().with_job_id(first.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let jid = push(&instance, with_tiers(cid, true, true), true).await;
        instance
            .push_config(other, PushConfigOptions::new())
            .await
            .unwrap();

        loop {
            let entry = tokio::time::timeout(Duration::from_secs(10), cid_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(entry.cid, cid);
            assert_eq!(entry.jid, jid);
            if entry.msg.contains("finished") {
                break;
            }
        }

        cancel_cid.cancel();
        cancel_job.cancel();
        assert!(by_cid.await.unwrap().is_ok());
        assert!(by_job.await.unwrap().is_ok());
        // Only the finished first job matches this filter.
        assert!(job_rx.recv().await.is_none());
    }
}
