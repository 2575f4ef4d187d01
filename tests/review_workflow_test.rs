use std::sync::Arc;

use chrono::{Duration, Utc};
use practicum::{
    domain::{
        FileMetadata, RequirementTemplate, StreamType, Student, Submission, SubmissionFilter,
        SubmissionKind, SubmissionStatus, Viewer,
    },
    error::AppError,
    repository::{InMemoryBackend, InMemoryKeyValueStore, SubmissionRepository},
    service::{AdHocUploadRequest, AssignRequest, ServiceContext},
};
use uuid::Uuid;

struct Fixture {
    backend: Arc<InMemoryBackend>,
    context: ServiceContext,
    instructor: Viewer,
    student: Viewer,
    templates: Vec<RequirementTemplate>,
}

fn template(title: &str) -> RequirementTemplate {
    RequirementTemplate {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: None,
        active: true,
        default_due_date: None,
        created_at: Utc::now(),
    }
}

fn file(name: &str) -> FileMetadata {
    FileMetadata {
        file_name: name.to_string(),
        file_url: format!("https://files.example/{}", name),
        content_type: Some("application/pdf".to_string()),
        size_bytes: Some(2048),
    }
}

async fn fixture() -> Fixture {
    let backend = Arc::new(InMemoryBackend::new());
    let instructor = Viewer::instructor(Uuid::new_v4());
    let student = Viewer::student(Uuid::new_v4());

    backend
        .insert_student(Student {
            id: student.id,
            full_name: "Dana Cruz".to_string(),
            instructor_id: Some(instructor.id),
        })
        .await;

    let templates = vec![
        template("Memorandum of Agreement"),
        template("Medical Certificate"),
        template("Parent Consent"),
    ];
    for t in &templates {
        backend.insert_template(t.clone()).await;
    }

    let context = ServiceContext::new(
        backend.clone(),
        Arc::new(InMemoryKeyValueStore::new()),
        &StreamType::ALL,
    )
    .await;

    Fixture {
        backend,
        context,
        instructor,
        student,
        templates,
    }
}

async fn submitted(fx: &Fixture) -> Submission {
    fx.context
        .review_service
        .submit_ad_hoc(
            &fx.student,
            AdHocUploadRequest {
                kind: SubmissionKind::Requirement,
                file: file("moa.pdf"),
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn reject_with_empty_reason_leaves_submission_unchanged() -> anyhow::Result<()> {
    let fx = fixture().await;
    let sub = submitted(&fx).await;

    let err = fx
        .context
        .review_service
        .reject(&fx.instructor, sub.id, "")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let stored = fx.backend.find_by_id(sub.id).await?.unwrap();
    assert_eq!(stored, sub);
    Ok(())
}

#[tokio::test]
async fn reject_with_reason_records_feedback() -> anyhow::Result<()> {
    let fx = fixture().await;
    let sub = submitted(&fx).await;

    let rejected = fx
        .context
        .review_service
        .reject(&fx.instructor, sub.id, "Missing signature")
        .await?;

    assert_eq!(rejected.status, SubmissionStatus::Rejected);
    assert_eq!(rejected.feedback.as_deref(), Some("Missing signature"));
    assert!(rejected.approved_date.is_none());
    Ok(())
}

#[tokio::test]
async fn approving_twice_is_invalid_state_and_resyncs() -> anyhow::Result<()> {
    let fx = fixture().await;
    let sub = submitted(&fx).await;
    let reviews = &fx.context.review_service;

    let approved = reviews.approve(&fx.instructor, sub.id, None).await?;
    assert_eq!(approved.status, SubmissionStatus::Approved);
    assert!(approved.approved_date.is_some());

    // Warm the cache, then hit the illegal transition.
    let filter = SubmissionFilter::for_owner(fx.student.id);
    reviews.list(filter).await?;
    assert!(fx.context.submission_cache.is_cached(&filter).await);

    let err = reviews.approve(&fx.instructor, sub.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    assert!(!fx.context.submission_cache.is_cached(&filter).await);

    let stored = fx.backend.find_by_id(sub.id).await?.unwrap();
    assert_eq!(stored, approved);
    Ok(())
}

#[tokio::test]
async fn only_the_supervising_instructor_may_review() -> anyhow::Result<()> {
    let fx = fixture().await;
    let sub = submitted(&fx).await;
    let stranger = Viewer::instructor(Uuid::new_v4());

    let err = fx
        .context
        .review_service
        .approve(&stranger, sub.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = fx
        .context
        .review_service
        .approve(&fx.student, sub.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    Ok(())
}

#[tokio::test]
async fn submissions_and_progress_are_visible_to_owner_and_supervisor_only() -> anyhow::Result<()> {
    let fx = fixture().await;
    let sub = submitted(&fx).await;
    let reviews = &fx.context.review_service;

    assert_eq!(reviews.view(&fx.student, sub.id).await?.id, sub.id);
    assert_eq!(reviews.view(&fx.instructor, sub.id).await?.id, sub.id);
    reviews.completion(&fx.instructor, fx.student.id).await?;

    let classmate = Viewer::student(Uuid::new_v4());
    let stranger = Viewer::instructor(Uuid::new_v4());
    for viewer in [&classmate, &stranger] {
        let err = reviews.view(viewer, sub.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = reviews.completion(viewer, fx.student.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
    Ok(())
}

#[tokio::test]
async fn ad_hoc_approvals_leave_templates_outstanding() -> anyhow::Result<()> {
    let fx = fixture().await;
    let reviews = &fx.context.review_service;

    for _ in 0..3 {
        let sub = submitted(&fx).await;
        reviews.approve(&fx.instructor, sub.id, None).await?;
    }

    let ratio = reviews.completion(&fx.student, fx.student.id).await?;
    assert_eq!((ratio.approved, ratio.total), (0, 3));
    assert!(!ratio.is_complete());
    Ok(())
}

#[tokio::test]
async fn rejected_submission_can_be_resubmitted() -> anyhow::Result<()> {
    let fx = fixture().await;
    let sub = submitted(&fx).await;
    let reviews = &fx.context.review_service;

    reviews.begin_review(&fx.instructor, sub.id).await?;
    reviews.reject(&fx.instructor, sub.id, "Blurry scan").await?;

    let again = reviews.upload(&fx.student, sub.id, file("moa-rescan.pdf")).await?;
    assert_eq!(again.status, SubmissionStatus::Submitted);
    assert!(again.approved_date.is_none());
    assert_eq!(again.file.unwrap().file_name, "moa-rescan.pdf");
    Ok(())
}

#[tokio::test]
async fn completion_counts_against_active_templates() -> anyhow::Result<()> {
    let fx = fixture().await;
    let reviews = &fx.context.review_service;

    for t in &fx.templates[..2] {
        let assigned = reviews
            .assign_from_template(
                &fx.instructor,
                AssignRequest {
                    student_id: fx.student.id,
                    template_id: t.id,
                    due_date: None,
                },
            )
            .await?;
        reviews.upload(&fx.student, assigned.id, file("doc.pdf")).await?;
        reviews.approve(&fx.instructor, assigned.id, Some("Good".to_string())).await?;
    }

    let ratio = reviews.completion(&fx.student, fx.student.id).await?;
    assert_eq!((ratio.approved, ratio.total), (2, 3));
    assert_eq!(ratio.to_string(), "2/3");
    Ok(())
}

#[tokio::test]
async fn ensure_assigned_creates_and_dates_in_one_step() -> anyhow::Result<()> {
    let fx = fixture().await;
    let due = Utc::now() + Duration::days(14);
    let template_id = fx.templates[0].id;

    let created = fx
        .context
        .review_service
        .ensure_assigned_then_set_due_date(&fx.instructor, fx.student.id, template_id, Some(due))
        .await?;
    assert_eq!(created.status, SubmissionStatus::Pending);
    assert_eq!(created.template_id, Some(template_id));
    assert_eq!(created.due_date, Some(due));

    // Second call updates the same submission.
    let later = due + Duration::days(7);
    let updated = fx
        .context
        .review_service
        .ensure_assigned_then_set_due_date(&fx.instructor, fx.student.id, template_id, Some(later))
        .await?;
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.due_date, Some(later));
    Ok(())
}

#[tokio::test]
async fn failed_ensure_assigned_leaves_nothing_behind() -> anyhow::Result<()> {
    let fx = fixture().await;
    fx.backend.set_offline(true).await;

    let err = fx
        .context
        .review_service
        .ensure_assigned_then_set_due_date(
            &fx.instructor,
            fx.student.id,
            fx.templates[1].id,
            Some(Utc::now()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Network(_)));

    fx.backend.set_offline(false).await;
    let all = fx
        .backend
        .list(&SubmissionFilter::for_owner(fx.student.id))
        .await?;
    assert!(all.is_empty());
    Ok(())
}

#[tokio::test]
async fn due_date_cannot_be_set_after_deletion() -> anyhow::Result<()> {
    let fx = fixture().await;
    let sub = submitted(&fx).await;
    let reviews = &fx.context.review_service;

    let dated = reviews
        .set_due_date(&fx.instructor, sub.id, Some(Utc::now()))
        .await?;
    assert_eq!(dated.status, SubmissionStatus::Submitted);

    reviews.delete(&fx.instructor, sub.id).await?;
    let err = reviews
        .set_due_date(&fx.instructor, sub.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn review_queue_lists_reviewable_work_oldest_first() -> anyhow::Result<()> {
    let fx = fixture().await;
    let reviews = &fx.context.review_service;

    let first = submitted(&fx).await;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = submitted(&fx).await;
    let done = submitted(&fx).await;
    reviews.approve(&fx.instructor, done.id, None).await?;
    reviews.begin_review(&fx.instructor, second.id).await?;

    let queue = reviews.review_queue(&fx.instructor).await?;
    let ids: Vec<Uuid> = queue.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(queue.iter().all(Submission::is_reviewable));
    Ok(())
}

#[tokio::test]
async fn every_stored_submission_satisfies_invariants() -> anyhow::Result<()> {
    let fx = fixture().await;
    let reviews = &fx.context.review_service;

    let a = submitted(&fx).await;
    let b = submitted(&fx).await;
    let c = submitted(&fx).await;
    reviews.approve(&fx.instructor, a.id, Some("Nice".to_string())).await?;
    reviews.reject(&fx.instructor, b.id, "Wrong form").await?;
    let _ = reviews.reject(&fx.instructor, c.id, "  ").await;
    let _ = reviews.approve(&fx.instructor, b.id, None).await;

    for sub in fx.backend.list(&SubmissionFilter::default()).await? {
        sub.check_invariants()?;
    }
    Ok(())
}
