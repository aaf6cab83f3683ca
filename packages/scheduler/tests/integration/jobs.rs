use std::time::Duration;

use common::job::JobStatus;
use common::tiers::HotStorage;
use scheduler::SchedulerError;

use crate::common::*;

mod push {
    use super::*;

    #[tokio::test]
    async fn hot_only_push_pins_and_serves_from_hot() {
        let node = TestNode::new();
        let data = payload(5000, 1);
        let cid = node.add(&data).await;

        let jid = node.push(hot_only(cid)).await;
        let job = node.wait_final(&jid).await;
        assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
        assert_eq!(job.cid, cid);
        assert_eq!(job.api_id, node.api_id);

        let info = node.scheduler.get_cid_info(&cid).await.unwrap();
        assert_eq!(info.job_id, jid);
        assert!(info.hot.enabled);
        assert!(info.hot.size >= data.len() as u64);
        assert!(info.hot.ipfs.created.is_some());
        assert!(!info.cold.filecoin.is_stored());

        let reader = node.scheduler.get_cid_from_hot(&cid).await.unwrap();
        assert_eq!(read_all(reader).await, data);
    }

    #[tokio::test]
    async fn cold_push_stores_every_shard() {
        let node = TestNode::new();
        let data = payload(20_000, 2);
        let cid = node.add(&data).await;

        let job = node.wait_final(&node.push(hot_and_cold(cid)).await).await;
        assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);

        let info = node.scheduler.get_cid_info(&cid).await.unwrap();
        let fil = &info.cold.filecoin;
        assert_eq!((fil.data_shards, fil.parity_shards), (3, 2));
        assert_eq!(fil.proposals.len(), 5);
        assert!(fil.proposals.iter().all(|p| !p.failed));

        let reader = node.scheduler.get_cid_from_cold(&cid, WALLET).await.unwrap();
        assert_eq!(read_all(reader).await, data);
    }

    #[tokio::test]
    async fn cold_read_without_cold_copy_is_not_found() {
        let node = TestNode::new();
        let cid = node.add(b"hot only").await;
        node.wait_final(&node.push(hot_only(cid)).await).await;

        let err = match node.scheduler.get_cid_from_cold(&cid, WALLET).await {
            Err(e) => e,
            Ok(_) => panic!("expected no cold copy"),
        };
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn second_push_keeps_existing_cold_copy() {
        let node = TestNode::new();
        let cid = node.add(&payload(3000, 3)).await;

        node.wait_final(&node.push(hot_and_cold(cid)).await).await;
        let first = node.scheduler.get_cid_info(&cid).await.unwrap();

        let jid = node.push(hot_and_cold(cid)).await;
        assert_eq!(node.wait_final(&jid).await.status, JobStatus::Success);
        let second = node.scheduler.get_cid_info(&cid).await.unwrap();

        assert_eq!(second.job_id, jid);
        assert_eq!(second.cold.filecoin.proposals, first.cold.filecoin.proposals);
        assert_eq!(second.hot.ipfs.created, first.hot.ipfs.created);
    }

    #[tokio::test]
    async fn disabling_hot_removes_it_from_hot_storage() {
        let node = TestNode::new();
        let cid = node.add(&payload(4000, 4)).await;
        node.wait_final(&node.push(hot_only(cid)).await).await;

        let mut cfg = hot_only(cid);
        cfg.hot.enabled = false;
        let job = node.wait_final(&node.push(cfg).await).await;
        assert_eq!(job.status, JobStatus::Success);

        let info = node.scheduler.get_cid_info(&cid).await.unwrap();
        assert!(!info.hot.enabled);
        assert_eq!(info.hot.size, 0);
        assert!(!has_block(&node.blocks, &cid).await);

        match node.scheduler.get_cid_from_hot(&cid).await {
            Err(SchedulerError::HotStorageDisabled(c)) => assert_eq!(c, cid),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected hot storage to be disabled"),
        }
    }

    #[tokio::test]
    async fn moving_from_hot_to_cold_keeps_the_content() {
        let node = TestNode::new();
        let data = payload(9000, 14);
        let cid = node.add(&data).await;
        let job = node.wait_final(&node.push(hot_only(cid)).await).await;
        assert_eq!(job.status, JobStatus::Success);

        let job = node.wait_final(&node.push(cold_only(cid)).await).await;
        assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);

        let info = node.scheduler.get_cid_info(&cid).await.unwrap();
        assert!(!info.hot.enabled);
        assert_eq!(info.cold.filecoin.proposals.len(), 5);
        assert!(!has_block(&node.blocks, &cid).await);
        assert!(matches!(
            node.scheduler.get_cid_from_hot(&cid).await,
            Err(SchedulerError::HotStorageDisabled(_))
        ));

        let reader = node.scheduler.get_cid_from_cold(&cid, WALLET).await.unwrap();
        assert_eq!(read_all(reader).await, data);
    }

    #[tokio::test]
    async fn final_jobs_leave_the_live_table() {
        let node = TestNode::new();
        let a = node.add(b"first done").await;
        let b = node.add(b"second done").await;
        let ja = node.push(hot_only(a)).await;
        let jb = node.push(hot_only(b)).await;
        node.wait_final(&ja).await;
        node.wait_final(&jb).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while node.scheduler.active_jobs() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        for jid in [ja, jb] {
            assert_eq!(
                node.scheduler.get_job(&jid).await.unwrap().status,
                JobStatus::Success
            );
        }
    }

    #[tokio::test]
    async fn unknown_job_and_cid_are_not_found() {
        let node = TestNode::new();
        let cid = common::cid::Cid::raw(b"never pushed");
        assert!(node.scheduler.get_cid_info(&cid).await.unwrap_err().is_not_found());
        assert!(
            node.scheduler
                .get_job(&common::job::JobId::new())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn missing_data_fails_the_job_with_a_cause() {
        let node = TestNode::new();
        let cid = common::cid::Cid::raw(b"not imported anywhere");

        let job = node.wait_final(&node.push(hot_only(cid)).await).await;
        assert_eq!(job.status, JobStatus::Failed);
        let cause = job.error_cause.unwrap();
        assert!(cause.contains("hot storage"), "{cause}");
        assert!(node.scheduler.get_cid_info(&cid).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn deal_duration_past_the_last_epoch_fails_the_job() {
        let node = TestNode::new();
        let cid = node.add(&payload(2000, 15)).await;

        let mut cfg = hot_and_cold(cid);
        cfg.cold.filecoin.deal_duration = u64::MAX;
        assert!(cfg.validate().is_ok());
        let job = node.wait_final(&node.push(cfg).await).await;
        assert_eq!(job.status, JobStatus::Failed);
        let cause = job.error_cause.unwrap();
        assert!(cause.contains("cold storage"), "{cause}");
    }

    #[tokio::test]
    async fn panic_during_execution_fails_the_job() {
        let node = TestNode::new();
        let cid = node.add(b"explodes").await;
        node.break_hot();

        let job = node.wait_final(&node.push(hot_only(cid)).await).await;
        assert_eq!(job.status, JobStatus::Failed);
        let cause = job.error_cause.unwrap();
        assert!(cause.contains("execution aborted"), "{cause}");

        // The Cid is free for the next job.
        node.scheduler.untrack(&cid).await.unwrap();
    }

    #[tokio::test]
    async fn hot_timeout_fails_the_job() {
        let node = TestNode::new();
        let cid = node.add(b"slow").await;
        node.close_gate();

        let mut cfg = hot_only(cid);
        cfg.hot.ipfs.add_timeout = 1;
        let job = node.wait_final(&node.push(cfg).await).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_cause.unwrap().contains("timed out"));
    }
}

mod unfreeze {
    use super::*;

    async fn frozen(node: &TestNode, data: &[u8]) -> common::cid::Cid {
        let cid = node.add(data).await;
        node.wait_final(&node.push(hot_and_cold(cid)).await).await;

        let mut cfg = hot_and_cold(cid);
        cfg.hot.enabled = false;
        assert_eq!(
            node.wait_final(&node.push(cfg).await).await.status,
            JobStatus::Success
        );
        assert!(!has_block(&node.blocks, &cid).await);
        cid
    }

    #[tokio::test]
    async fn allow_unfreeze_restores_hot_copy_from_cold() {
        let node = TestNode::new();
        let data = payload(12_000, 5);
        let cid = frozen(&node, &data).await;

        let mut cfg = hot_and_cold(cid);
        cfg.hot.allow_unfreeze = true;
        let job = node.wait_final(&node.push(cfg).await).await;
        assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);

        let reader = node.scheduler.get_cid_from_hot(&cid).await.unwrap();
        assert_eq!(read_all(reader).await, data);
        assert!(node.scheduler.get_cid_info(&cid).await.unwrap().hot.enabled);
    }

    #[tokio::test]
    async fn without_unfreeze_missing_hot_data_fails() {
        let node = TestNode::new();
        let cid = frozen(&node, &payload(2000, 6)).await;

        let job = node.wait_final(&node.push(hot_and_cold(cid)).await).await;
        assert_eq!(job.status, JobStatus::Failed);
    }
}

mod replace {
    use super::*;

    #[tokio::test]
    async fn replace_moves_hot_storage_to_new_cid() {
        let node = TestNode::new();
        let old_data = payload(3000, 7);
        let new_data = payload(3500, 8);
        let old = node.add(&old_data).await;
        node.wait_final(&node.push(hot_only(old)).await).await;
        let new = node.add(&new_data).await;

        let jid = node
            .scheduler
            .push_replace(&node.api_id, WALLET, hot_only(new), old)
            .await
            .unwrap();
        let job = node.wait_final(&jid).await;
        assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);

        let reader = node.scheduler.get_cid_from_hot(&new).await.unwrap();
        assert_eq!(read_all(reader).await, new_data);
        assert!(matches!(
            node.scheduler.get_cid_from_hot(&old).await,
            Err(SchedulerError::HotStorageDisabled(_))
        ));
    }

    #[tokio::test]
    async fn replace_cancels_the_old_cids_job() {
        let node = TestNode::new();
        let old = node.add(&payload(2500, 16)).await;
        let new = node.add(&payload(2600, 17)).await;
        node.close_gate();

        let old_job = node.push(hot_only(old)).await;
        wait_status(&node, &old_job, JobStatus::Executing).await;

        let jid = node
            .scheduler
            .push_replace(&node.api_id, WALLET, hot_only(new), old)
            .await
            .unwrap();
        node.open_gate();

        assert_eq!(node.wait_final(&old_job).await.status, JobStatus::Canceled);
        let job = node.wait_final(&jid).await;
        assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
        assert!(!node.hot.is_stored(&old).await.unwrap());
        assert!(node.hot.is_stored(&new).await.unwrap());
    }
}

mod cancel {
    use super::*;

    #[tokio::test]
    async fn untrack_cancels_executing_job() {
        let node = TestNode::new();
        let cid = node.add(b"held").await;
        node.close_gate();

        let jid = node.push(hot_only(cid)).await;
        wait_status(&node, &jid, JobStatus::Executing).await;

        node.scheduler.untrack(&cid).await.unwrap();
        let job = node.wait_final(&jid).await;
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(job.error_cause.is_none());

        // Idempotent.
        node.scheduler.untrack(&cid).await.unwrap();
    }

    #[tokio::test]
    async fn untrack_cancels_queued_job_without_running_it() {
        let node = TestNode::with_parallelism(1);
        let first = node.add(b"first").await;
        let second = node.add(b"second").await;
        node.close_gate();

        let running = node.push(hot_only(first)).await;
        wait_status(&node, &running, JobStatus::Executing).await;
        let queued = node.push(hot_only(second)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            node.scheduler.get_job(&queued).await.unwrap().status,
            JobStatus::Queued
        );

        node.scheduler.untrack(&second).await.unwrap();
        assert_eq!(node.wait_final(&queued).await.status, JobStatus::Canceled);

        node.open_gate();
        assert_eq!(node.wait_final(&running).await.status, JobStatus::Success);
        assert!(node.scheduler.get_cid_info(&second).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn close_cancels_in_flight_jobs_and_rejects_new_ones() {
        let node = TestNode::new();
        let cid = node.add(b"closing").await;
        node.close_gate();

        let jid = node.push(hot_only(cid)).await;
        wait_status(&node, &jid, JobStatus::Executing).await;

        node.scheduler.close();
        node.scheduler.close();
        assert!(node.scheduler.is_closed());
        assert_eq!(node.wait_final(&jid).await.status, JobStatus::Canceled);

        let err = node
            .scheduler
            .push_config(&node.api_id, WALLET, hot_only(cid))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Closed));
    }
}

mod renewals {
    use super::*;

    #[tokio::test]
    async fn renewal_sweep_renews_deals_near_expiry() {
        let node = TestNode::new();
        let cid = node.add(&payload(6000, 9)).await;
        let mut cfg = hot_and_cold(cid);
        cfg.cold.filecoin.renew.enabled = true;
        cfg.cold.filecoin.renew.threshold = u64::MAX;

        node.wait_final(&node.push(cfg).await).await;
        let before = node.scheduler.get_cid_info(&cid).await.unwrap();

        assert_eq!(node.scheduler.run_renewals().await.unwrap(), 1);
        let after = node.scheduler.get_cid_info(&cid).await.unwrap();
        assert_eq!(after.cold.filecoin.proposals.len(), 5);
        for (old, new) in before
            .cold
            .filecoin
            .proposals
            .iter()
            .zip(&after.cold.filecoin.proposals)
        {
            assert_eq!(old.shard_cid, new.shard_cid);
            assert_ne!(old.proposal_cid, new.proposal_cid);
        }
    }

    #[tokio::test]
    async fn renewal_sweep_skips_untracked_and_non_renewing_cids() {
        let node = TestNode::new();
        let plain = node.add(&payload(1000, 10)).await;
        node.wait_final(&node.push(hot_and_cold(plain)).await).await;

        let renewing = node.add(&payload(1000, 11)).await;
        let mut cfg = hot_and_cold(renewing);
        cfg.cold.filecoin.renew.enabled = true;
        cfg.cold.filecoin.renew.threshold = 5;
        node.wait_final(&node.push(cfg).await).await;

        assert_eq!(node.scheduler.run_renewals().await.unwrap(), 1);
        node.scheduler.untrack(&renewing).await.unwrap();
        assert_eq!(node.scheduler.run_renewals().await.unwrap(), 0);
    }
}
