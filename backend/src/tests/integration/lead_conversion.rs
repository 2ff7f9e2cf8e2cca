use chrono::Utc;
use futures::future::join_all;
use salesflow_shared::{Contact, LeadStatus};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::{ConvertLeadOptions, WorkflowOrchestrator};
use crate::store::{DocumentStore, InMemoryStore};
use crate::tests::{fixtures, test_config, TestContext};

#[tokio::test]
async fn test_john_smith_conversion() {
    let ctx = TestContext::new();
    let lead = fixtures::lead("John Smith", "john@techcorp.com", Some("TechCorp"));
    ctx.store.insert_lead(&lead).await.unwrap();

    let result = ctx
        .state
        .orchestrator
        .convert_lead_to_deal(lead.id, ConvertLeadOptions::default())
        .await
        .unwrap();

    let companies = ctx.store.companies().await;
    assert_eq!(companies.len(), 1);
    assert_eq!(companies[0].name, "TechCorp");
    assert_eq!(Some(companies[0].id), result.company_id);

    let contacts = ctx.store.contacts().await;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].first_name, "John");
    assert_eq!(contacts[0].last_name, "Smith");
    assert_eq!(contacts[0].email.as_deref(), Some("john@techcorp.com"));
    assert_eq!(Some(contacts[0].id), result.contact_id);

    let deals = ctx.store.deals().await;
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0].company_id, result.company_id);
    assert_eq!(deals[0].contact_id, result.contact_id);
    assert_eq!(deals[0].currency, "USD");

    let converted = ctx.store.get_lead(lead.id).await.unwrap().unwrap();
    assert_eq!(converted.status, LeadStatus::Converted);

    let feed = ctx
        .state
        .orchestrator
        .activities()
        .history("deal", result.deal_id, None)
        .await
        .unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].action, "created");
    assert_eq!(feed[0].metadata["lead_id"], serde_json::json!(lead.id));
}

#[tokio::test]
async fn test_sequential_conversions_reuse_company_and_contact() {
    let ctx = TestContext::new();
    let orchestrator = &ctx.state.orchestrator;

    let john = fixtures::lead("John Smith", "john@techcorp.com", Some("TechCorp"));
    let jane = fixtures::lead("Jane Doe", "jane@techcorp.com", Some("TechCorp"));
    let john_again = fixtures::lead("J. Smith", "john@techcorp.com", Some("TechCorp"));
    for lead in [&john, &jane, &john_again] {
        ctx.store.insert_lead(lead).await.unwrap();
    }

    let first = orchestrator.convert_lead_to_deal(john.id, ConvertLeadOptions::default()).await.unwrap();
    let second = orchestrator.convert_lead_to_deal(jane.id, ConvertLeadOptions::default()).await.unwrap();
    let third = orchestrator
        .convert_lead_to_deal(john_again.id, ConvertLeadOptions::default())
        .await
        .unwrap();

    assert_eq!(ctx.store.companies().await.len(), 1);
    assert_eq!(first.company_id, second.company_id);
    assert_eq!(first.company_id, third.company_id);

    // Same email, same contact; different email, new contact
    assert_eq!(ctx.store.contacts().await.len(), 2);
    assert_eq!(first.contact_id, third.contact_id);
    assert_ne!(first.contact_id, second.contact_id);

    assert_eq!(ctx.store.deals().await.len(), 3);
}

#[tokio::test]
async fn test_existing_contact_gets_company_backfilled() {
    let ctx = TestContext::new();
    let contact = Contact {
        id: Uuid::new_v4(),
        first_name: "Maria".into(),
        last_name: "Garcia".into(),
        email: Some("maria@globex.com".into()),
        phone: None,
        company_id: None,
        tags: vec!["vip".into()],
        created_at: Utc::now(),
        updated_at: None,
    };
    ctx.store.insert_contact(&contact).await.unwrap();
    let lead = fixtures::lead("Maria Garcia", "maria@globex.com", Some("Globex"));
    ctx.store.insert_lead(&lead).await.unwrap();

    let result = ctx
        .state
        .orchestrator
        .convert_lead_to_deal(lead.id, ConvertLeadOptions::default())
        .await
        .unwrap();

    assert_eq!(result.contact_id, Some(contact.id));
    let updated = ctx.store.get_contact(contact.id).await.unwrap().unwrap();
    assert_eq!(updated.company_id, result.company_id);
    assert_eq!(updated.tags, vec!["vip".to_string()]);
}

#[tokio::test]
async fn test_conversion_without_company_or_contact() {
    let ctx = TestContext::new();
    let lead = fixtures::random_lead();
    ctx.store.insert_lead(&lead).await.unwrap();

    let result = ctx
        .state
        .orchestrator
        .convert_lead_to_deal(
            lead.id,
            ConvertLeadOptions {
                create_company: false,
                create_contact: false,
                deal_title: Some("Pilot project".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(result.company_id.is_none());
    assert!(result.contact_id.is_none());
    assert!(ctx.store.companies().await.is_empty());
    assert!(ctx.store.contacts().await.is_empty());

    let deal = ctx.store.get_deal(result.deal_id).await.unwrap().unwrap();
    assert_eq!(deal.title, "Pilot project");
}

#[tokio::test]
async fn test_converted_lead_with_missing_deal_is_converted_again() {
    let ctx = TestContext::new();
    let mut lead = fixtures::lead("Ann Lee", "ann@initech.com", None);
    lead.status = LeadStatus::Converted;
    lead.converted_deal_id = Some(Uuid::new_v4());
    ctx.store.insert_lead(&lead).await.unwrap();

    let result = ctx
        .state
        .orchestrator
        .convert_lead_to_deal(lead.id, ConvertLeadOptions::default())
        .await
        .unwrap();

    let updated = ctx.store.get_lead(lead.id).await.unwrap().unwrap();
    assert_eq!(updated.converted_deal_id, Some(result.deal_id));
    assert_eq!(ctx.store.deals().await.len(), 1);
}

#[tokio::test]
async fn test_missing_lead_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx
        .state
        .orchestrator
        .convert_lead_to_deal(Uuid::new_v4(), ConvertLeadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_negative_estimate_rejected() {
    let ctx = TestContext::new();
    let lead = fixtures::random_lead();
    ctx.store.insert_lead(&lead).await.unwrap();

    let err = ctx
        .state
        .orchestrator
        .convert_lead_to_deal(
            lead.id,
            ConvertLeadOptions {
                estimated_value: Some(rust_decimal::Decimal::from(-1)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError { .. }));
    assert!(ctx.store.deals().await.is_empty());
}

#[tokio::test]
async fn test_lead_update_failure_keeps_reused_company() {
    let ctx = TestContext::new();
    let orchestrator = &ctx.state.orchestrator;

    let first = fixtures::lead("John Smith", "john@techcorp.com", Some("TechCorp"));
    ctx.store.insert_lead(&first).await.unwrap();
    orchestrator.convert_lead_to_deal(first.id, ConvertLeadOptions::default()).await.unwrap();

    let second = fixtures::lead("Jane Doe", "jane@techcorp.com", Some("TechCorp"));
    ctx.store.insert_lead(&second).await.unwrap();
    ctx.store.fail_on("update_lead");

    let err = orchestrator
        .convert_lead_to_deal(second.id, ConvertLeadOptions::default())
        .await
        .unwrap_err();

    match err {
        AppError::PartialSagaFailure {
            saga,
            failed_step,
            completed_steps,
            compensated,
            source,
            ..
        } => {
            assert_eq!(saga, "convert_lead_to_deal");
            assert_eq!(failed_step, "update_lead");
            assert_eq!(completed_steps, vec!["create_contact", "create_deal"]);
            assert!(compensated);
            assert!(matches!(*source, AppError::DatabaseError(_)));
        }
        other => panic!("unexpected error {:?}", other),
    }

    // Only rows created by the failed run are removed
    assert_eq!(ctx.store.companies().await.len(), 1);
    assert_eq!(ctx.store.contacts().await.len(), 1);
    assert_eq!(ctx.store.deals().await.len(), 1);
    assert_eq!(
        ctx.store.get_lead(second.id).await.unwrap().unwrap().status,
        LeadStatus::Qualified
    );
}

#[tokio::test]
#[serial]
async fn test_slow_store_surfaces_unavailable() {
    let store = Arc::new(InMemoryStore::with_chart_of_accounts());
    let orchestrator = WorkflowOrchestrator::new(
        store.clone(),
        test_config().organization,
        Duration::from_millis(20),
    );
    let lead = fixtures::lead("John Smith", "john@techcorp.com", Some("TechCorp"));
    store.insert_lead(&lead).await.unwrap();
    store.delay_on("find_company_by_name", Duration::from_millis(250));

    let err = orchestrator
        .convert_lead_to_deal(lead.id, ConvertLeadOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Unavailable(_)));
    assert!(store.companies().await.is_empty());
    assert!(store.deals().await.is_empty());

    // Retryable once the store recovers
    store.clear_failures();
    orchestrator
        .convert_lead_to_deal(lead.id, ConvertLeadOptions::default())
        .await
        .unwrap();
    assert_eq!(store.deals().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_concurrent_conversions_share_one_company() {
    let ctx = TestContext::new();
    ctx.store.delay_on("find_company_by_name", Duration::from_millis(10));

    let mut lead_ids = Vec::new();
    for i in 0..5 {
        let lead = fixtures::lead(&format!("Buyer {}", i), &format!("buyer{}@acme.io", i), Some("Acme"));
        ctx.store.insert_lead(&lead).await.unwrap();
        lead_ids.push(lead.id);
    }

    let orchestrator = ctx.state.orchestrator.clone();
    let conversions = join_all(lead_ids.into_iter().map(|id| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.convert_lead_to_deal(id, ConvertLeadOptions::default()).await })
    }))
    .await;

    let results: Vec<_> = conversions.into_iter().map(|joined| joined.unwrap().unwrap()).collect();
    assert_eq!(ctx.store.companies().await.len(), 1);
    assert!(results.iter().all(|r| r.company_id == results[0].company_id));
    assert_eq!(ctx.store.contacts().await.len(), 5);
    assert_eq!(ctx.store.deals().await.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_compensation_never_removes_company_another_conversion_used() {
    let ctx = TestContext::new();
    let first = fixtures::lead("Ann Lee", "ann@acme.io", Some("Acme"));
    let second = fixtures::lead("Bo Chen", "bo@acme.io", Some("Acme"));
    ctx.store.insert_lead(&first).await.unwrap();
    ctx.store.insert_lead(&second).await.unwrap();

    // The first conversion creates Acme, then stalls before its deal insert
    ctx.store.delay_on("find_contact_by_email", Duration::from_millis(200));
    let orchestrator = ctx.state.orchestrator.clone();
    let failing = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.convert_lead_to_deal(first.id, ConvertLeadOptions::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let succeeding = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.convert_lead_to_deal(second.id, ConvertLeadOptions::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.store.fail_on("insert_deal");

    let err = failing.await.unwrap().unwrap_err();
    assert!(matches!(err, AppError::PartialSagaFailure { compensated: true, .. }));
    ctx.store.clear_failures();

    let conversion = succeeding.await.unwrap().unwrap();
    let company_id = conversion.company_id.unwrap();

    let companies = ctx.store.companies().await;
    assert_eq!(companies.len(), 1);
    assert_eq!(companies[0].id, company_id);
    assert_eq!(companies[0].name, "Acme");

    let deal = ctx.store.get_deal(conversion.deal_id).await.unwrap().unwrap();
    assert_eq!(deal.company_id, Some(company_id));
    let contact = ctx.store.get_contact(conversion.contact_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(contact.company_id, Some(company_id));
}
