//! Integration tests for profile materialization.
//!
//! First-contact profiles from password sign-up and OAuth, idempotency, and
//! initials staying in step with names.

#![allow(clippy::unwrap_used)]

use serde_json::json;

use bizay_core::{AuthProvider, OAuthStrategy};
use bizay_integration_tests::{TestMarket, principal, secret, sign_up_form};
use bizay_marketplace::error::{ErrorKind, MarketError};
use bizay_marketplace::profile::{ProfileEdit, ProviderHints};
use bizay_marketplace::store::{DocumentStore, StorePath};

#[tokio::test]
async fn test_password_sign_up_creates_profile_with_initials() {
    let t = TestMarket::new();
    t.password.assign_ids([principal("u1")]);

    let snapshot = t
        .market
        .session()
        .sign_up_with_password(&sign_up_form("Marie", "Leroy", "marie@example.ht"))
        .await
        .unwrap();

    let profile = snapshot.profile.unwrap();
    assert_eq!(profile.principal, principal("u1"));
    assert_eq!(profile.initials.as_str(), "ML");

    let stored = t.store.read(&StorePath::user(&principal("u1"))).await.unwrap().unwrap();
    assert_eq!(stored["initials"], json!("ML"));
    assert_eq!(stored["authProvider"], json!("password"));
    assert_eq!(stored["email"], json!("marie@example.ht"));
}

#[tokio::test]
async fn test_oauth_sign_up_without_surname() {
    let t = TestMarket::new();
    t.script_oauth("u2", OAuthStrategy::Google, "Jean", "");

    let snapshot = t
        .market
        .session()
        .sign_in_with_oauth(OAuthStrategy::Google)
        .await
        .unwrap();

    let profile = snapshot.profile.unwrap();
    assert_eq!(profile.initials.as_str(), "J");
    assert_eq!(profile.last_name, "");
    assert_eq!(profile.auth_provider, Some(AuthProvider::OAuth("google".into())));
    assert_eq!(t.store.write_count(), 1);
}

#[tokio::test]
async fn test_load_or_materialize_is_idempotent() {
    let t = TestMarket::new();
    let profiles = t.market.profiles();
    let hints = ProviderHints {
        first_name: Some("Jean".into()),
        ..ProviderHints::default()
    };
    let provider = AuthProvider::oauth(OAuthStrategy::Google);

    let first = profiles
        .load_or_materialize(&principal("u2"), &provider, &hints)
        .await
        .unwrap();
    let second = profiles
        .load_or_materialize(&principal("u2"), &provider, &ProviderHints::default())
        .await
        .unwrap();

    assert!(first.was_created());
    assert!(!second.was_created());
    assert_eq!(first.profile(), second.profile());
    assert_eq!(t.store.write_count(), 1);
}

#[tokio::test]
async fn test_hints_never_overwrite_stored_profile() {
    let t = TestMarket::new();
    t.store
        .write(
            &StorePath::user(&principal("u3")),
            json!({"firstName": "Paul", "lastName": "Michel", "initials": "PM"}),
        )
        .await
        .unwrap();
    t.script_oauth("u3", OAuthStrategy::Facebook, "Pierre", "Jean-Louis");

    let snapshot = t
        .market
        .session()
        .sign_in_with_oauth(OAuthStrategy::Facebook)
        .await
        .unwrap();

    let profile = snapshot.profile.unwrap();
    assert_eq!(profile.display_name(), "Paul Michel");
    assert_eq!(profile.initials.as_str(), "PM");
}

#[tokio::test]
async fn test_concurrent_first_logins_keep_one_record() {
    let t = TestMarket::new();
    let profiles = t.market.profiles();
    let provider = AuthProvider::oauth(OAuthStrategy::Apple);
    let phone = ProviderHints {
        first_name: Some("Rose".into()),
        ..ProviderHints::default()
    };
    let tablet = ProviderHints {
        first_name: Some("Rosie".into()),
        ..ProviderHints::default()
    };

    let (principal_a, principal_b) = (principal("u4"), principal("u4"));
    let (a, b) = tokio::join!(
        profiles.load_or_materialize(&principal_a, &provider, &phone),
        profiles.load_or_materialize(&principal_b, &provider, &tablet),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.profile(), b.profile());
    assert_eq!(t.store.write_count(), 1);
}

#[tokio::test]
async fn test_edit_recomputes_initials_in_same_write() {
    let t = TestMarket::new();
    let session = t.market.session();
    session
        .sign_up_with_password(&sign_up_form("Marie", "Leroy", "marie@example.ht"))
        .await
        .unwrap();
    let writes = t.store.write_count();

    let mut edit = ProfileEdit::from_profile(&session.snapshot().profile.unwrap());
    edit.first_name = "Ana".into();
    edit.last_name = "Joseph".into();
    let profile = session.edit_profile(&edit).await.unwrap();

    assert_eq!(profile.initials.as_str(), "AJ");
    assert_eq!(t.store.write_count(), writes + 1);
    let stored = t
        .store
        .read(&StorePath::user(&profile.principal))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["initials"], json!("AJ"));
}

#[tokio::test]
async fn test_sign_up_validates_before_any_call() {
    let t = TestMarket::new();
    let mut form = sign_up_form("Marie", "", "marie@example.ht");
    form.phone = "  ".into();

    let err = t
        .market
        .session()
        .sign_up_with_password(&form)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        err.user_message(),
        "Veuillez remplir tous les champs obligatoires : Nom, Téléphone."
    );
    assert_eq!(t.store.write_count(), 0);
}

#[tokio::test]
async fn test_store_outage_keeps_loaded_profile() {
    let t = TestMarket::new();
    let session = t.market.session();
    session
        .sign_up_with_password(&sign_up_form("Marie", "Leroy", "marie@example.ht"))
        .await
        .unwrap();
    let loaded = session.snapshot().profile;

    t.store.set_offline(true);
    let err = session.refresh().await.unwrap_err();
    assert!(matches!(err, MarketError::Store(_)));
    assert_eq!(session.snapshot().profile, loaded);
}

#[tokio::test]
async fn test_edit_after_failed_materialization_creates_nothing() {
    let t = TestMarket::new();
    t.register("u5", "rose@example.ht", "secret1");
    let session = t.market.session();

    t.store.set_offline(true);
    let err = session
        .sign_in_with_password("rose@example.ht", &secret("secret1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    assert!(session.snapshot().profile.is_none());
    t.store.set_offline(false);

    let edit = ProfileEdit {
        first_name: "Rose".into(),
        last_name: "Pierre".into(),
        ..ProfileEdit::default()
    };
    let err = session.edit_profile(&edit).await.unwrap_err();
    assert!(matches!(err, MarketError::ProfileNotFound(ref p) if p == &principal("u5")));
    assert_eq!(t.store.write_count(), 0);

    // The next refresh materializes a complete record.
    let profile = session.refresh().await.unwrap().profile.unwrap();
    assert_eq!(profile.email, "rose@example.ht");
    assert_eq!(profile.auth_provider, Some(AuthProvider::Password));
}
