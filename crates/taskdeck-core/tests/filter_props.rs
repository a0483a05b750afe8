//! Property tests for the pure task views.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use taskdeck_core::filter::{self, Completion, FilterKind, FilterSelection};
use taskdeck_core::model::{Category, CategorySet, Priority, TaskRecord};
use taskdeck_core::status::Status;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0)
        .single()
        .expect("date")
}

fn arb_category() -> impl Strategy<Value = Category> {
    prop::sample::select(Category::ALL.to_vec())
}

fn arb_status() -> impl Strategy<Value = Status> {
    prop::sample::select(Status::ALL.to_vec())
}

fn arb_kind() -> impl Strategy<Value = FilterKind> {
    prop::sample::select(FilterKind::ALL.to_vec())
}

fn arb_task() -> impl Strategy<Value = (Vec<Category>, Status, i64)> {
    (
        prop::collection::btree_set(arb_category(), 0..=3),
        arb_status(),
        0i64..60,
    )
        .prop_map(|(categories, status, day)| (categories.into_iter().collect(), status, day))
}

fn arb_tasks() -> impl Strategy<Value = Vec<TaskRecord>> {
    prop::collection::vec(arb_task(), 0..24).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(seq, (categories, status, day))| TaskRecord {
                id: format!("td-{seq}"),
                project_id: "p-1".into(),
                title: format!("task {seq}"),
                status,
                priority: Priority::Medium,
                categories: CategorySet::try_from(categories).expect("at most three"),
                icon: None,
                created_by: "u-1".into(),
                assigned_to: if seq % 2 == 0 { "u-1" } else { "u-2" }.into(),
                deadline: base() + Duration::days(day),
                one_line: String::new(),
                memo: String::new(),
                related_url: None,
                created_at: base(),
                updated_at: base(),
            })
            .collect()
    })
}

fn positions(all: &[TaskRecord], subset: &[TaskRecord]) -> Vec<usize> {
    subset
        .iter()
        .map(|task| all.iter().position(|t| t.id == task.id).expect("from input"))
        .collect()
}

proptest! {
    #[test]
    fn filter_is_an_ordered_subsequence(tasks in arb_tasks(), kind in arb_kind()) {
        let selection = FilterSelection::new(kind);
        let out = filter::filter(&tasks, &selection);

        let at = positions(&tasks, &out);
        prop_assert!(at.windows(2).all(|pair| pair[0] < pair[1]));
        for task in &tasks {
            let kept = out.iter().any(|t| t.id == task.id);
            prop_assert_eq!(kept, selection.matches(&task.categories));
        }
    }

    #[test]
    fn specific_filters_require_their_category(tasks in arb_tasks(), kind in arb_kind()) {
        let out = filter::filter(&tasks, &FilterSelection::new(kind));
        match kind.required_category() {
            Some(category) => prop_assert!(out.iter().all(|t| t.categories.contains(category))),
            None => prop_assert_eq!(out, tasks),
        }
    }

    #[test]
    fn refinement_only_narrows(tasks in arb_tasks(), kind in arb_kind(), extra in arb_category()) {
        let broad = filter::filter(&tasks, &FilterSelection::new(kind));
        let narrow = filter::filter(&tasks, &FilterSelection::new(kind).refined(extra));
        prop_assert!(narrow.len() <= broad.len());
        prop_assert!(narrow.iter().all(|t| broad.contains(t) && t.categories.contains(extra)));
    }

    #[test]
    fn board_partitions_and_completion_agree(tasks in arb_tasks()) {
        let board = filter::by_status(&tasks);
        let total = board.todo.len() + board.in_progress.len() + board.done.len();
        prop_assert_eq!(total, tasks.len());
        for status in Status::ALL {
            prop_assert!(board.column(status).iter().all(|t| t.status == status));
        }

        let completion = Completion::of(&tasks);
        prop_assert_eq!(completion.done, board.done.len());
        prop_assert!(completion.percent() <= 100);
    }

    #[test]
    fn upcoming_is_sorted_and_bounded(tasks in arb_tasks(), offset in 0i64..60, days in 0i64..30) {
        let now = base() + Duration::days(offset);
        let window = filter::upcoming(&tasks, now, days);
        prop_assert!(window.windows(2).all(|pair| pair[0].deadline <= pair[1].deadline));
        for task in &window {
            prop_assert!(task.status != Status::Done);
            prop_assert!(task.deadline >= now && task.deadline <= now + Duration::days(days));
        }
    }
}
