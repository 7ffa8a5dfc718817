//! Property tests across entitlements, unsubscribe links, the wallet and
//! daily usage.

use chrono::Duration;
use proptest::prelude::*;
use verse_api::signature::{unsubscribe_token, verify_unsubscribe_token};
use verse_api::{MemoryStore, Store};
use verse_core::{
    resolve_entitlements, usage_day, DebitOutcome, EntitlementInputs, EntitlementSource,
    QuotaPolicy, Tier,
};
use verse_test_utils::{clocks, fixtures, generators::*, Clock};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime builds")
}

proptest! {
    #[test]
    fn prop_entitlement_precedence(
        user in arb_user_id(),
        now in arb_timestamp(),
        stripe_tier in arb_tier(),
        status in arb_subscription_status(),
        period_offset_days in -60i64..60,
        crypto_tier in arb_tier(),
        crypto_offset_days in -60i64..60,
        with_crypto in any::<bool>(),
    ) {
        let lexi = fixtures::lexi();
        let mut subscription = fixtures::active_subscription(user, &lexi.key, stripe_tier, now);
        subscription.status = status;
        subscription.current_period_end = Some(now + Duration::days(period_offset_days));
        let crypto = with_crypto.then(|| {
            fixtures::crypto_subscription(
                user,
                &lexi.key,
                crypto_tier,
                now + Duration::days(crypto_offset_days),
            )
        });

        let inputs = EntitlementInputs {
            subscription: Some(subscription),
            crypto: crypto.clone(),
            ..Default::default()
        };
        let ent = resolve_entitlements(&inputs, &lexi, &QuotaPolicy::default(), now);

        let crypto_live = crypto.as_ref().is_some_and(|c| c.expires_at > now);
        let stripe_live = status.grants_access() && period_offset_days > 0;
        let (tier, source) = if crypto_live {
            (crypto_tier, EntitlementSource::Crypto)
        } else if stripe_live {
            (stripe_tier, EntitlementSource::Stripe)
        } else {
            (Tier::Free, EntitlementSource::None)
        };
        prop_assert_eq!(ent.tier, tier);
        prop_assert_eq!(ent.source, source);
        prop_assert_eq!(ent.nsfw_access, tier.includes_nsfw());
    }

    #[test]
    fn prop_founder_price_is_locked_for_members_only(
        user in arb_user_id(),
        now in arb_timestamp(),
        seat_number in 1u32..=100,
        anonymous in any::<bool>(),
    ) {
        let lexi = fixtures::lexi();
        let inputs = EntitlementInputs {
            anonymous,
            founder: Some(fixtures::founder_seat(user, &lexi, seat_number, now)),
            ..Default::default()
        };
        let ent = resolve_entitlements(&inputs, &lexi, &QuotaPolicy::default(), now);

        prop_assert_eq!(ent.founder, !anonymous);
        if anonymous {
            prop_assert_eq!(ent.price_cents, lexi.premium_price_cents);
            prop_assert_eq!(ent.chat_quota, Some(5));
        } else {
            prop_assert_eq!(ent.price_cents, lexi.founder_price_cents);
        }
    }

    #[test]
    fn prop_unsubscribe_token_names_its_email(email in arb_email()) {
        let token = unsubscribe_token("unsub-secret", &email);
        prop_assert_eq!(
            verify_unsubscribe_token("unsub-secret", &token).ok(),
            Some(email.to_lowercase())
        );
        prop_assert!(verify_unsubscribe_token("other-secret", &token).is_err());
    }

    #[test]
    fn prop_debit_never_overdraws(
        user in arb_user_id(),
        credit in arb_coin_amount(),
        debit in arb_coin_amount(),
    ) {
        let rt = runtime();
        let store = MemoryStore::new();
        let now = clocks::midday().now();

        let outcome = rt.block_on(async {
            store.wallet_credit(user, credit, "purchase", Some("pack-1"), now).await?;
            store.wallet_debit(user, debit, "voice", Some("reply-1"), now).await
        }).unwrap();
        let balance = rt.block_on(store.wallet_balance(user)).unwrap();

        if debit <= credit {
            prop_assert!(matches!(outcome, DebitOutcome::Debited(_)));
            prop_assert_eq!(balance, credit - debit);
        } else {
            prop_assert_eq!(outcome, DebitOutcome::Insufficient { balance: credit });
            prop_assert_eq!(balance, credit);
        }
    }

    #[test]
    fn prop_usage_starts_fresh_each_day(
        subject in arb_subject(),
        messages in 1u32..10,
        later_secs in 43_200i64..129_600,
    ) {
        let rt = runtime();
        let store = MemoryStore::new();
        let today = usage_day(clocks::midday().now());
        let tomorrow = usage_day(clocks::midday_plus(later_secs).now());

        rt.block_on(async {
            for _ in 0..messages {
                store.usage_increment(&subject, "lexi", today, None).await?;
            }
            Ok::<_, verse_api::ApiError>(())
        }).unwrap();

        prop_assert_ne!(today, tomorrow);
        prop_assert_eq!(rt.block_on(store.usage_get(&subject, "lexi", today)).unwrap(), messages);
        prop_assert_eq!(rt.block_on(store.usage_get(&subject, "lexi", tomorrow)).unwrap(), 0);
    }
}
