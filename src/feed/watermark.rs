//! Decides which feed items are new.
//!
//! A subscription's watermark is the timestamp of the newest item already
//! reported. An item is new iff it has a resolvable timestamp strictly
//! greater than the watermark. Undated items cannot be ordered against the
//! watermark and are never reported.

use super::parser::Item;

/// Items to announce for one feed, and the watermark to store once they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// New items paired with their resolved timestamps, oldest first.
    pub items: Vec<(i64, Item)>,
    /// Newest selected timestamp, or the old watermark if nothing was selected.
    pub watermark: i64,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn select_new(items: Vec<Item>, watermark: i64) -> Selection {
    let mut selected: Vec<(i64, Item)> = items
        .into_iter()
        .filter_map(|item| item.timestamp().map(|ts| (ts, item)))
        .filter(|(ts, _)| *ts > watermark)
        .collect();

    // Stable: items sharing a timestamp keep the parser's order
    selected.sort_by_key(|(ts, _)| *ts);

    let watermark = selected.last().map_or(watermark, |(ts, _)| *ts);

    Selection {
        items: selected,
        watermark,
    }
}

/// Watermark to store when posting stopped at `selection.items[failed_at]`.
///
/// Only timestamps strictly below the failed item's count as delivered,
/// otherwise a later item sharing that timestamp would fall on the
/// watermark and never be reported. Never moves below `previous`.
pub fn watermark_before(selection: &Selection, failed_at: usize, previous: i64) -> i64 {
    let Some((failed_ts, _)) = selection.items.get(failed_at) else {
        return selection.watermark;
    };

    selection.items[..failed_at]
        .iter()
        .map(|(ts, _)| *ts)
        .filter(|ts| ts < failed_ts)
        .max()
        .map_or(previous, |ts| ts.max(previous))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn item(title: &str, ts: Option<i64>) -> Item {
        Item {
            title: title.to_string(),
            link: format!("https://example.com/{}", title),
            published: ts,
            updated: None,
        }
    }

    fn titles(selection: &Selection) -> Vec<&str> {
        selection
            .items
            .iter()
            .map(|(_, i)| i.title.as_str())
            .collect()
    }

    #[test]
    fn test_empty_feed_keeps_watermark() {
        let selection = select_new(Vec::new(), 1000);
        assert!(selection.is_empty());
        assert_eq!(selection.watermark, 1000);
    }

    #[test]
    fn test_boundary_item_not_reported() {
        let selection = select_new(vec![item("a", Some(1000)), item("b", Some(1000))], 1000);
        assert!(selection.is_empty());
        assert_eq!(selection.watermark, 1000);
    }

    #[test]
    fn test_new_items_sorted_oldest_first() {
        let selection = select_new(
            vec![
                item("c", Some(3000)),
                item("old", Some(500)),
                item("a", Some(1500)),
                item("b", Some(2000)),
            ],
            1000,
        );
        assert_eq!(titles(&selection), vec!["a", "b", "c"]);
        assert_eq!(selection.watermark, 3000);
    }

    #[test]
    fn test_undated_items_ignored() {
        let selection = select_new(vec![item("undated", None), item("dated", Some(2000))], 1000);
        assert_eq!(titles(&selection), vec!["dated"]);
        assert_eq!(selection.watermark, 2000);

        let selection = select_new(vec![item("undated", None)], 1000);
        assert!(selection.is_empty());
        assert_eq!(selection.watermark, 1000);
    }

    #[test]
    fn test_updated_fallback_counts() {
        let mut edited = item("edited", None);
        edited.updated = Some(2000);
        let selection = select_new(vec![edited], 1000);
        assert_eq!(selection.watermark, 2000);
    }

    #[test]
    fn test_equal_timestamps_keep_parser_order() {
        let selection = select_new(
            vec![item("x", Some(2000)), item("y", Some(2000)), item("w", Some(1500))],
            1000,
        );
        assert_eq!(titles(&selection), vec!["w", "x", "y"]);
    }

    #[test]
    fn test_watermark_before_failure() {
        let selection = select_new(
            vec![item("a", Some(1500)), item("b", Some(2000)), item("c", Some(2500))],
            1000,
        );
        assert_eq!(watermark_before(&selection, 0, 1000), 1000);
        assert_eq!(watermark_before(&selection, 1, 1000), 1500);
        assert_eq!(watermark_before(&selection, 2, 1000), 2000);
        // Out of range means everything was posted
        assert_eq!(watermark_before(&selection, 3, 1000), 2500);
    }

    #[test]
    fn test_watermark_before_failure_with_shared_timestamp() {
        let selection = select_new(
            vec![item("a", Some(1500)), item("b", Some(2000)), item("c", Some(2000))],
            1000,
        );
        // "b" was posted but "c" shares its timestamp, so 2000 cannot be stored
        assert_eq!(watermark_before(&selection, 2, 1000), 1500);
    }

    proptest! {
        #[test]
        fn prop_reported_iff_dated_and_newer(
            stamps in proptest::collection::vec(proptest::option::of(0i64..5000), 0..40),
            watermark in 0i64..5000,
        ) {
            let items: Vec<Item> = stamps
                .iter()
                .enumerate()
                .map(|(i, ts)| item(&i.to_string(), *ts))
                .collect();

            let expected: Vec<i64> = {
                let mut v: Vec<i64> = stamps.iter().flatten().copied().filter(|ts| *ts > watermark).collect();
                v.sort();
                v
            };

            let selection = select_new(items, watermark);
            let got: Vec<i64> = selection.items.iter().map(|(ts, _)| *ts).collect();

            prop_assert_eq!(&got, &expected);
            prop_assert_eq!(selection.watermark, expected.last().copied().unwrap_or(watermark));
            prop_assert!(selection.watermark >= watermark);
        }

        #[test]
        fn prop_second_pass_selects_nothing(
            stamps in proptest::collection::vec(proptest::option::of(0i64..5000), 0..40),
            watermark in 0i64..5000,
        ) {
            let items: Vec<Item> = stamps
                .iter()
                .enumerate()
                .map(|(i, ts)| item(&i.to_string(), *ts))
                .collect();

            let first = select_new(items.clone(), watermark);
            let second = select_new(items, first.watermark);
            prop_assert!(second.is_empty());
            prop_assert_eq!(second.watermark, first.watermark);
        }
    }
}
