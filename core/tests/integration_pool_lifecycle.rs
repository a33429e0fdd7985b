// End-to-end pool lifecycle: register -> list -> approve -> claim
//
// Exercises the full control-plane flow the way a client and a provider
// would drive it, including persistence across service restarts.

use std::sync::Arc;

use relaypool_core::{
    LeaseApproval, MemoryStorage, PoolConfig, PoolError, PoolService, ProviderRegistration,
    SledStorage,
};

// 44-char base64 of 32 bytes, WireGuard-style.
const CLIENT_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

fn registration(id: &str, endpoint: &str) -> ProviderRegistration {
    ProviderRegistration {
        id: id.to_string(),
        endpoint: endpoint.to_string(),
        public_key: "PKEY".to_string(),
        ..Default::default()
    }
}

#[test]
fn full_lease_lifecycle() {
    let service =
        PoolService::with_allowlist_gate(&PoolConfig::default(), Arc::new(MemoryStorage::new()));

    // Register a provider at a public endpoint.
    service
        .register_provider(Some("tok"), registration("p1", "203.0.113.5:51820"))
        .unwrap();

    // A paid listing includes p1 exactly once, with a future-dated lease.
    let listed = service.list_providers(Some("tok")).unwrap();
    assert_eq!(listed.len(), 1);
    let entry = &listed[0];
    assert_eq!(entry.provider.id, "p1");
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    assert!(entry.lease.lease_exp > now);

    // Approving the lease queues exactly one claim for p1.
    let approval = LeaseApproval {
        provider_id: "p1".to_string(),
        token: Some("tok".to_string()),
        client_ip: entry.lease.client_ip.clone(),
        lease_nonce: entry.lease.lease_nonce.clone(),
        lease_exp: Some(entry.lease.lease_exp),
        lease_sig: entry.lease.lease_sig.clone(),
        client_public_key: CLIENT_KEY.to_string(),
    };
    service.approve(Some("tok"), &approval).unwrap();
    assert_eq!(service.pending_claims("p1"), 1);

    // The provider gets the claim once, then nothing.
    let claim = service.next_claim(Some("tok"), "p1").unwrap().unwrap();
    assert_eq!(claim.lease_nonce, entry.lease.lease_nonce);
    assert_eq!(claim.client_ip, entry.lease.client_ip);
    assert_eq!(claim.client_public_key, CLIENT_KEY);
    assert!(service.next_claim(Some("tok"), "p1").unwrap().is_none());

    // Replaying the same approval queues a second claim for the same
    // nonce; dedup is the provider's concern, delivery is at-most-once
    // per queued claim.
    service.approve(Some("tok"), &approval).unwrap();
    assert!(service.next_claim(Some("tok"), "p1").unwrap().is_some());
    assert!(service.next_claim(Some("tok"), "p1").unwrap().is_none());
}

#[test]
fn loopback_registration_rejected_and_absent() {
    let service =
        PoolService::with_allowlist_gate(&PoolConfig::default(), Arc::new(MemoryStorage::new()));

    let err = service
        .register_provider(Some("tok"), registration("evil", "127.0.0.1:51820"))
        .unwrap_err();
    assert_eq!(err, PoolError::SsrfRejected);

    assert_eq!(
        service.list_providers(Some("tok")).unwrap_err(),
        PoolError::NoProvidersAvailable
    );
}

#[test]
fn state_survives_service_restart_over_sled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool").to_str().unwrap().to_string();
    let config = PoolConfig::default();

    let approval = {
        let store = Arc::new(SledStorage::open(&path).unwrap());
        let service = PoolService::with_allowlist_gate(&config, store);
        service
            .register_provider(Some("tok"), registration("p1", "203.0.113.5:51820"))
            .unwrap();

        let listed = service.list_providers(Some("tok")).unwrap();
        let entry = &listed[0];
        let approval = LeaseApproval {
            provider_id: "p1".to_string(),
            token: Some("tok".to_string()),
            client_ip: entry.lease.client_ip.clone(),
            lease_nonce: entry.lease.lease_nonce.clone(),
            lease_exp: Some(entry.lease.lease_exp),
            lease_sig: entry.lease.lease_sig.clone(),
            client_public_key: CLIENT_KEY.to_string(),
        };
        service.approve(Some("tok"), &approval).unwrap();
        approval
        // sled store dropped here; everything must come back from disk
    };

    let store = Arc::new(SledStorage::open(&path).unwrap());
    let service = PoolService::with_allowlist_gate(&config, store);

    // Provider snapshot and claim queue both survived.
    let listed = service.list_providers(Some("tok")).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].provider.id, "p1");

    let claim = service.next_claim(Some("tok"), "p1").unwrap().unwrap();
    assert_eq!(claim.lease_nonce, approval.lease_nonce);
    assert!(service.next_claim(Some("tok"), "p1").unwrap().is_none());
}

#[test]
fn leases_are_caller_bound_across_tokens() {
    let config = PoolConfig {
        paid_tokens: vec!["alice".to_string(), "bob".to_string()],
        ..Default::default()
    };
    let service = PoolService::with_allowlist_gate(&config, Arc::new(MemoryStorage::new()));
    service
        .register_provider(Some("alice"), registration("p1", "203.0.113.5:51820"))
        .unwrap();

    let alice_lease = &service.list_providers(Some("alice")).unwrap()[0].lease;
    let approval = LeaseApproval {
        provider_id: "p1".to_string(),
        token: None,
        client_ip: alice_lease.client_ip.clone(),
        lease_nonce: alice_lease.lease_nonce.clone(),
        lease_exp: Some(alice_lease.lease_exp),
        lease_sig: alice_lease.lease_sig.clone(),
        client_public_key: CLIENT_KEY.to_string(),
    };

    // Bob cannot redeem a lease minted for Alice's session.
    assert_eq!(
        service.approve(Some("bob"), &approval).unwrap_err(),
        PoolError::SignatureInvalid
    );
    // Alice can.
    service.approve(Some("alice"), &approval).unwrap();
    assert_eq!(service.pending_claims("p1"), 1);
}
