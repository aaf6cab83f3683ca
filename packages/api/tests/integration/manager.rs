use std::sync::Arc;

use api::ApiError;

use crate::common::*;

mod tokens {
    use super::*;

    #[tokio::test]
    async fn token_resolves_to_the_created_instance() {
        let env = TestEnv::new();
        let (id, token) = env.manager.create().await.unwrap();
        assert!(id.is_valid());

        let instance = env.manager.get_by_token(&token).await.unwrap();
        assert_eq!(instance.id(), &id);
        let again = env.manager.get_by_token(&token).await.unwrap();
        assert!(Arc::ptr_eq(&instance, &again));
    }

    #[tokio::test]
    async fn each_instance_gets_its_own_wallet() {
        let env = TestEnv::new();
        let a = env.instance().await;
        let b = env.instance().await;
        assert_ne!(a.id(), b.id());
        assert_ne!(a.wallet_addr(), b.wallet_addr());
    }

    #[tokio::test]
    async fn unknown_tokens_are_rejected() {
        let env = TestEnv::new();
        for token in ["0b7a4d4e-6a51-4c8e-a3f4-2f0e6f6f4b11", "../etc/passwd", ""] {
            assert!(
                matches!(
                    env.manager.get_by_token(token).await,
                    Err(ApiError::InvalidToken)
                ),
                "{token:?}"
            );
        }
    }

    #[tokio::test]
    async fn instances_are_restored_from_the_store() {
        let env = TestEnv::new();
        let (id, token) = env.manager.create().await.unwrap();
        let created = env.manager.get_by_token(&token).await.unwrap();
        let cid = env.add(b"persisted").await;
        push(&created, with_tiers(cid, true, false), false).await;

        let restarted = TestEnv::with_kv(env.kv.clone());
        let loaded = restarted.manager.get_by_token(&token).await.unwrap();
        assert_eq!(loaded.id(), &id);
        assert_eq!(loaded.wallet_addr(), created.wallet_addr());
        assert_eq!(loaded.info().await.unwrap().pins, vec![cid]);
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn close_closes_instances_and_refuses_new_ones() {
        let env = TestEnv::new();
        let instance = env.instance().await;

        env.manager.close();
        env.manager.close();
        assert!(instance.is_closed());
        assert!(matches!(env.manager.create().await, Err(ApiError::Closed)));
    }
}
