use assert_matches::assert_matches;
use attr_broker::{AttributeBrokerConfig, AttributeStreamBroker};
use attr_broker_integration_tests::{invocation, invocation_with_settings, numbers_broker};
use attr_pip_api::{AttributeStream, PipStreamError, StaticPipRegistry};
use attr_types::{AttributeInvocation, AttributeValue, InvocationSettings};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[test_log::test(tokio::test(start_paused = true))]
async fn slow_pip_is_bridged_by_the_timeout_sentinel() -> anyhow::Result<()> {
    // First upstream value arrives after 5 ms but the policy only waits 1 ms:
    // the sentinel bridges the gap, then live values follow.
    let (broker, _) = numbers_broker(Duration::from_millis(5));
    let invocation = invocation_with_settings(
        "test.numbers",
        InvocationSettings {
            initial_timeout: Duration::from_millis(1),
            ..InvocationSettings::default()
        },
    );

    let mut subscription = broker.attribute_stream(&invocation, false);
    assert_eq!(
        subscription.next().await,
        Some(Ok(AttributeValue::error("time out")))
    );
    assert_eq!(
        subscription.next().await,
        Some(Ok(AttributeValue::from(0i64)))
    );
    assert_eq!(
        subscription.next().await,
        Some(Ok(AttributeValue::from(1i64)))
    );
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn empty_pip_yields_timeout_then_empty() -> anyhow::Result<()> {
    let registry = StaticPipRegistry::new().with_pip(
        "test.silence",
        |_: &AttributeInvocation| -> Result<AttributeStream, PipStreamError> {
            Ok(async_stream::stream! {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if false {
                    yield Ok(AttributeValue::Null);
                }
            }
            .boxed())
        },
    );
    let broker = AttributeStreamBroker::with_config(
        Arc::new(registry),
        AttributeBrokerConfig {
            timeout_sentinel: AttributeValue::error("time out"),
            empty_sentinel: AttributeValue::error("empty"),
            ..AttributeBrokerConfig::default()
        },
    );
    let invocation = invocation_with_settings(
        "test.silence",
        InvocationSettings {
            initial_timeout: Duration::from_millis(1),
            ..InvocationSettings::default()
        },
    );

    let observed: Vec<_> = broker.attribute_stream(&invocation, false).collect().await;
    assert_eq!(
        observed,
        vec![
            Ok(AttributeValue::error("time out")),
            Ok(AttributeValue::error("empty")),
        ],
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn unknown_attribute_surfaces_as_terminal_error() -> anyhow::Result<()> {
    let broker = AttributeStreamBroker::new(Arc::new(StaticPipRegistry::new()));
    let invocation = invocation("not.registered");

    let mut subscription = broker.attribute_stream(&invocation, false);
    assert_matches!(
        subscription.next().await,
        Some(Err(PipStreamError::UnknownAttribute(name))) if name == "not.registered"
    );
    assert_eq!(subscription.next().await, None);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn pips_compute_against_the_invocation_entity() -> anyhow::Result<()> {
    // A PIP sees the full invocation: this one derives roles from the entity.
    let registry = StaticPipRegistry::new().with_pip(
        "user.roles",
        |invocation: &AttributeInvocation| -> Result<AttributeStream, PipStreamError> {
            let roles = match invocation.entity() {
                Some(AttributeValue::Text(subject)) if subject == "alice" => {
                    vec!["admin", "auditor"]
                }
                Some(AttributeValue::Text(_)) => vec!["viewer"],
                _ => {
                    return Err(PipStreamError::Resolution {
                        attribute: invocation.name().to_string(),
                        message: "entity must be a subject name".to_owned(),
                    });
                }
            };
            let roles = AttributeValue::Array(
                roles.into_iter().map(AttributeValue::from).collect(),
            );
            Ok(futures::stream::iter([Ok(roles)]).boxed())
        },
    );
    let broker = AttributeStreamBroker::new(Arc::new(registry));

    let alice = AttributeInvocation::new(
        "user.roles",
        Some(AttributeValue::from("alice")),
        Vec::new(),
        BTreeMap::new(),
        InvocationSettings::default(),
    )?;
    let observed: Vec<_> = broker.attribute_stream(&alice, false).collect().await;
    assert_eq!(
        observed,
        vec![Ok(AttributeValue::Array(vec![
            AttributeValue::from("admin"),
            AttributeValue::from("auditor"),
        ]))],
    );

    // A different entity is a different invocation and a different stream.
    let bob = AttributeInvocation::new(
        "user.roles",
        Some(AttributeValue::from("bob")),
        Vec::new(),
        BTreeMap::new(),
        InvocationSettings::default(),
    )?;
    let observed: Vec<_> = broker.attribute_stream(&bob, false).collect().await;
    assert_eq!(
        observed,
        vec![Ok(AttributeValue::Array(vec![AttributeValue::from(
            "viewer"
        )]))],
    );
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn fresh_and_reuse_subscribers_can_coexist() -> anyhow::Result<()> {
    let (broker, resolves) = numbers_broker(Duration::from_millis(10));
    let invocation = invocation("test.numbers");

    let mut shared_a = broker.attribute_stream(&invocation, false);
    let mut shared_b = broker.attribute_stream(&invocation, false);
    let mut private = broker.attribute_stream(&invocation, true);

    assert_eq!(shared_a.next().await, Some(Ok(AttributeValue::from(0i64))));
    assert_eq!(shared_b.next().await, Some(Ok(AttributeValue::from(0i64))));
    assert_eq!(private.next().await, Some(Ok(AttributeValue::from(0i64))));

    // Two upstreams: one shared by both reuse-mode callers, one private.
    assert_eq!(resolves.get(), 2);
    assert_eq!(broker.active_stream_count(), 1);
    Ok(())
}
