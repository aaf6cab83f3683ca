use api::{ApiError, PushConfigOptions};
use common::cid::Cid;
use common::cid_config::DefaultCidConfig;
use common::job::JobStatus;

use crate::common::*;

mod push_config {
    use super::*;

    #[tokio::test]
    async fn second_push_requires_override() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let cid = env.add(b"pushed twice").await;

        let first = instance
            .push_config(cid, PushConfigOptions::new())
            .await
            .unwrap();
        assert!(!first.as_str().is_empty());

        let err = instance
            .push_config(cid, PushConfigOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MustOverrideConfig(c) if c == cid));

        let second = instance
            .push_config(cid, PushConfigOptions::new().with_override(true))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(wait_final(&instance, &second).await.status, JobStatus::Success);
    }

    #[tokio::test]
    async fn default_template_is_applied_to_pushed_cid() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let cid = env.add(b"defaults").await;

        let expected = instance.get_default_cid_config(cid).await;
        assert_eq!(expected.cid, cid);

        instance
            .push_config(cid, PushConfigOptions::new())
            .await
            .unwrap();
        assert_eq!(instance.get_cid_config(&cid).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_without_a_job() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let cid = env.add(b"invalid").await;

        let mut cfg = with_tiers(cid, true, true);
        cfg.cold.filecoin.parity_shards = 0;
        let err = instance
            .push_config(cid, PushConfigOptions::new().with_cid_config(cfg))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidConfig(_)));
        assert!(instance.get_cid_config(&cid).await.unwrap_err().is_not_found());
        assert!(instance.show(&cid).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn config_for_another_cid_is_rejected() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let cid = env.add(b"mine").await;

        let err = instance
            .push_config(
                cid,
                PushConfigOptions::new().with_cid_config(with_tiers(Cid::raw(b"other"), true, false)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn default_config_changes_are_validated_and_persisted() {
        let env = TestEnv::new();
        let (_, token) = env.manager.create().await.unwrap();
        let instance = env.manager.get_by_token(&token).await.unwrap();

        let mut invalid = DefaultCidConfig::default();
        invalid.hot.ipfs.add_timeout = 0;
        assert!(matches!(
            instance.set_default_cid_config(invalid).await,
            Err(ApiError::InvalidConfig(_))
        ));

        let mut updated = DefaultCidConfig::default();
        updated.hot.allow_unfreeze = true;
        instance.set_default_cid_config(updated.clone()).await.unwrap();

        let cid = Cid::raw(b"any");
        assert!(instance.get_default_cid_config(cid).await.hot.allow_unfreeze);

        // Loaded again from the shared store by a fresh node.
        let reloaded = TestEnv::with_kv(env.kv.clone());
        let again = reloaded.manager.get_by_token(&token).await.unwrap();
        assert_eq!(again.get_default_cid_config(cid).await, updated.for_cid(cid));
        assert_eq!(again.wallet_addr(), instance.wallet_addr());
    }
}

mod remove {
    use super::*;

    #[tokio::test]
    async fn active_tiers_block_removal() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let cid = env.add(&payload(3000, 1)).await;

        let mut first = true;
        for (hot, cold) in [(true, true), (true, false), (false, true)] {
            let jid = push(&instance, with_tiers(cid, hot, cold), !first).await;
            first = false;
            let job = wait_final(&instance, &jid).await;
            assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);

            let err = instance.remove(&cid).await.unwrap_err();
            assert!(
                matches!(err, ApiError::ActiveInStorage(c) if c == cid),
                "hot={hot} cold={cold}: {err}"
            );
        }

        let jid = push(&instance, with_tiers(cid, false, false), true).await;
        wait_final(&instance, &jid).await;
        instance.remove(&cid).await.unwrap();

        assert!(instance.get_cid_config(&cid).await.unwrap_err().is_not_found());
        assert!(instance.info().await.unwrap().pins.is_empty());
        assert!(instance.remove(&cid).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn unknown_cid_is_not_found() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        assert!(
            instance
                .remove(&Cid::raw(b"unknown"))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}

mod replace {
    use super::*;

    #[tokio::test]
    async fn untracked_cid_cannot_be_replaced() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let old = Cid::raw(b"old");
        let new = env.add(b"new").await;

        let err = instance.replace(old, new).await.unwrap_err();
        assert!(matches!(err, ApiError::ReplacedCidNotFound(c) if c == old));
    }

    #[tokio::test]
    async fn replace_moves_the_policy_to_the_new_cid() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let old_data = payload(2000, 2);
        let new_data = payload(2500, 3);
        let old = env.add(&old_data).await;

        let mut policy = with_tiers(old, true, false);
        policy.hot.allow_unfreeze = true;
        wait_final(&instance, &push(&instance, policy.clone(), false).await).await;

        let new = env.add(&new_data).await;
        let jid = instance.replace(old, new).await.unwrap();
        let job = wait_final(&instance, &jid).await;
        assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
        assert_eq!(job.cid, new);

        assert!(instance.get_cid_config(&old).await.unwrap_err().is_not_found());
        let mut expected = policy;
        expected.cid = new;
        assert_eq!(instance.get_cid_config(&new).await.unwrap(), expected);

        assert_eq!(read_all(instance.get(&new).await.unwrap()).await, new_data);
        assert_eq!(instance.info().await.unwrap().pins, vec![new]);
    }
}

mod reads {
    use super::*;

    #[tokio::test]
    async fn hot_read_follows_the_hot_flag() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let data = payload(10_000, 4);
        let cid = env.add(&data).await;

        let jid = push(&instance, with_tiers(cid, true, false), false).await;
        assert_eq!(wait_final(&instance, &jid).await.status, JobStatus::Success);
        assert_eq!(read_all(instance.get(&cid).await.unwrap()).await, data);

        let jid = push(&instance, with_tiers(cid, false, false), true).await;
        assert_eq!(wait_final(&instance, &jid).await.status, JobStatus::Success);
        match instance.get(&cid).await {
            Err(ApiError::HotStorageDisabled(c)) => assert_eq!(c, cid),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected hot storage to be disabled"),
        }
    }

    #[tokio::test]
    async fn cold_read_reconstructs_the_content() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let data = payload(25_000, 5);
        let cid = env.add(&data).await;

        let jid = push(&instance, with_tiers(cid, true, true), false).await;
        assert_eq!(wait_final(&instance, &jid).await.status, JobStatus::Success);

        let info = instance.show(&cid).await.unwrap();
        assert_eq!(info.cold.filecoin.proposals.len(), 3);
        assert_eq!(read_all(instance.get_from_cold(&cid).await.unwrap()).await, data);
    }

    #[tokio::test]
    async fn show_of_never_stored_cid_is_not_found() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        assert!(instance.show(&Cid::raw(b"nope")).await.unwrap_err().is_not_found());
        assert!(instance.get(&Cid::raw(b"nope")).await.is_err());
    }

    #[tokio::test]
    async fn info_reports_wallet_and_pins() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let a = env.add(b"a").await;
        let b = env.add(b"b").await;
        push(&instance, with_tiers(a, true, false), false).await;
        push(&instance, with_tiers(b, true, false), false).await;

        let info = instance.info().await.unwrap();
        assert_eq!(&info.id, instance.id());
        assert_eq!(info.wallet.address, instance.wallet_addr());
        assert!(info.wallet.address.starts_with("f3"));
        assert_eq!(info.wallet.balance, INITIAL_BALANCE);
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(info.pins, expected);
    }
}

mod close {
    use super::*;

    #[tokio::test]
    async fn closed_instance_refuses_new_work() {
        let env = TestEnv::new();
        let instance = env.instance().await;
        let cid = env.add(b"late").await;

        instance.close();
        instance.close();
        assert!(instance.is_closed());
        assert!(matches!(
            instance.push_config(cid, PushConfigOptions::new()).await,
            Err(ApiError::Closed)
        ));
    }
}
