//! Search filter over todo records.

use tickoff_core::record::TodoRecord;

/// Records whose text contains `query`, ignoring case.
///
/// A blank query (after trimming) keeps everything. Order is preserved.
///
/// ```
/// use tickoff_todo::filter::filter_refs;
/// # use tickoff_core::record::{NewTodo, TodoId, TodoRecord};
/// # let now = tickoff_core::Utc::now();
/// # let todo = |id, text| TodoRecord::new(TodoId::new(id), NewTodo::parse(text).unwrap(), now);
/// let records = vec![todo(1, "Buy Milk"), todo(2, "clean house")];
///
/// let hits = filter_refs("MIL", &records);
/// assert_eq!(hits.len(), 1);
/// assert_eq!(hits[0].text, "Buy Milk");
/// ```
#[must_use]
pub fn filter_refs<'a>(query: &str, records: &'a [TodoRecord]) -> Vec<&'a TodoRecord> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return records.iter().collect();
    }
    records
        .iter()
        .filter(|r| r.text.to_lowercase().contains(&needle))
        .collect()
}

/// Owned variant of [`filter_refs`]
#[must_use]
pub fn filter(query: &str, records: &[TodoRecord]) -> Vec<TodoRecord> {
    filter_refs(query, records).into_iter().cloned().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tickoff_core::environment::Clock;
    use tickoff_core::record::{NewTodo, TodoId};
    use tickoff_testing::test_clock;

    fn records(texts: &[&str]) -> Vec<TodoRecord> {
        let now = test_clock().now();
        texts
            .iter()
            .zip(1..)
            .map(|(text, id)| TodoRecord::new(TodoId::new(id), NewTodo::parse(text).unwrap(), now))
            .collect()
    }

    #[test]
    fn empty_query_keeps_everything() {
        let all = records(&["Buy Milk", "clean house"]);
        assert_eq!(filter("", &all), all);
        assert_eq!(filter("   ", &all), all);
    }

    #[test]
    fn matches_case_insensitively() {
        let all = records(&["Buy Milk", "clean house"]);
        let hits = filter("MIL", &all);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "Buy Milk");
    }

    #[test]
    fn surrounding_whitespace_in_query_is_ignored() {
        let all = records(&["Buy Milk"]);
        assert_eq!(filter("  milk ", &all).len(), 1);
    }

    #[test]
    fn no_match_yields_nothing() {
        let all = records(&["Buy Milk"]);
        assert!(filter("eggs", &all).is_empty());
    }

    proptest! {
        #[test]
        fn result_is_an_ordered_subset(
            texts in proptest::collection::vec("[a-zA-Z ]{1,12}", 0..12),
            query in "[a-zA-Z]{0,3}",
        ) {
            let texts: Vec<&str> = texts.iter().map(String::as_str).filter(|t| !t.trim().is_empty()).collect();
            let all = records(&texts);
            let hits = filter_refs(&query, &all);

            prop_assert!(hits.len() <= all.len());
            prop_assert!(hits.windows(2).all(|w| w[0].id < w[1].id));
            for hit in &hits {
                prop_assert!(hit.text.to_lowercase().contains(&query.to_lowercase()));
            }
        }

        #[test]
        fn query_case_does_not_matter(
            texts in proptest::collection::vec("[a-zA-Z]{1,10}", 0..8),
            query in "[a-zA-Z]{1,3}",
        ) {
            let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
            let all = records(&texts);
            prop_assert_eq!(
                filter(&query.to_uppercase(), &all),
                filter(&query.to_lowercase(), &all)
            );
        }
    }
}
