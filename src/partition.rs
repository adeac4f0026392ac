use crate::error::{Error, Result};
use crate::formats::{Chapter, parse_timestamp};

/// Stable sort by publication date, oldest first.
///
/// Chapters without a date, or with one that does not parse, go after every
/// dated chapter and keep their input order.
pub fn sort_chapters_by_date(chapters: &mut [Chapter]) {
    chapters.sort_by_cached_key(|chapter| {
        let date = chapter.date.as_deref().and_then(parse_timestamp);
        (date.is_none(), date)
    });
}

/// Sorts `chapters` and cuts them into contiguous parts of
/// `ceil(len / part_count)` chapters each.
///
/// The last part may be shorter and no part is ever empty, so fewer parts than
/// requested can come back. A `part_count` of 0 or 1 yields a single part.
pub fn split_into_parts(mut chapters: Vec<Chapter>, part_count: usize) -> Result<Vec<Vec<Chapter>>> {
    if chapters.is_empty() {
        return Err(Error::NoChapters);
    }

    sort_chapters_by_date(&mut chapters);
    if part_count <= 1 {
        return Ok(vec![chapters]);
    }

    let per_part = chapters.len().div_ceil(part_count);
    let mut parts = Vec::with_capacity(part_count.min(chapters.len()));
    let mut rest = chapters.into_iter().peekable();
    while rest.peek().is_some() {
        parts.push(rest.by_ref().take(per_part).collect::<Vec<_>>());
    }

    tracing::debug!(
        requested = part_count,
        produced = parts.len(),
        per_part,
        "split chapters into parts"
    );
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(title: &str, date: Option<&str>) -> Chapter {
        Chapter {
            title: title.to_owned(),
            content: format!("<p>{title}</p>"),
            url: Some(format!("https://example.com/{title}")),
            date: date.map(str::to_owned),
        }
    }

    fn dated(n: usize) -> Vec<Chapter> {
        (1..=n)
            .map(|i| chapter(&format!("c{i}"), Some(&format!("2023-01-{i:02}"))))
            .collect()
    }

    fn titles(part: &[Chapter]) -> Vec<&str> {
        part.iter().map(|c| c.title.as_str()).collect()
    }

    fn sizes(parts: &[Vec<Chapter>]) -> Vec<usize> {
        parts.iter().map(Vec::len).collect()
    }

    #[test]
    fn sort_puts_oldest_first_and_undated_last() {
        let mut chapters = vec![
            chapter("undated-a", None),
            chapter("march", Some("2023-03-01")),
            chapter("garbage", Some("not a date")),
            chapter("january", Some("2023-01-15T10:00:00Z")),
            chapter("undated-b", None),
            chapter("february", Some("2023-02-01 08:00:00")),
        ];

        sort_chapters_by_date(&mut chapters);

        assert_eq!(
            titles(&chapters),
            vec!["january", "february", "march", "undated-a", "garbage", "undated-b"]
        );
    }

    #[test]
    fn sort_keeps_input_order_for_equal_dates() {
        let mut chapters = vec![
            chapter("b", Some("2023-01-01")),
            chapter("a", Some("2023-01-01")),
        ];
        sort_chapters_by_date(&mut chapters);
        assert_eq!(titles(&chapters), vec!["b", "a"]);
    }

    #[test]
    fn single_part_holds_everything_sorted() {
        let mut input = dated(4);
        input.reverse();

        let parts = split_into_parts(input, 1).unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(titles(&parts[0]), vec!["c1", "c2", "c3", "c4"]);
    }

    #[test]
    fn zero_part_count_behaves_like_one() {
        let parts = split_into_parts(dated(3), 0).unwrap();
        assert_eq!(sizes(&parts), vec![3]);
    }

    #[test]
    fn three_chapters_into_two_parts() {
        let parts = split_into_parts(dated(3), 2).unwrap();
        assert_eq!(sizes(&parts), vec![2, 1]);
    }

    #[test]
    fn six_chapters_into_three_parts() {
        let parts = split_into_parts(dated(6), 3).unwrap();
        assert_eq!(sizes(&parts), vec![2, 2, 2]);
    }

    #[test]
    fn more_parts_than_chapters_yields_one_per_chapter() {
        let parts = split_into_parts(dated(3), 10).unwrap();
        assert_eq!(sizes(&parts), vec![1, 1, 1]);
    }

    #[test]
    fn empty_input_is_an_error() {
        for part_count in [0, 1, 5] {
            let err = split_into_parts(Vec::new(), part_count).unwrap_err();
            assert!(matches!(err, Error::NoChapters));
        }
    }

    #[test]
    fn ceil_sized_windows_can_produce_fewer_parts() {
        // 5 chapters, 4 requested: windows of 2 give 3 parts.
        let parts = split_into_parts(dated(5), 4).unwrap();
        assert_eq!(sizes(&parts), vec![2, 2, 1]);
    }

    #[test]
    fn parts_concatenate_to_the_sorted_input() {
        for len in 1..=12 {
            for part_count in 1..=14 {
                let mut input = dated(len);
                input.rotate_left(len / 2);
                let mut expected = input.clone();
                sort_chapters_by_date(&mut expected);

                let parts = split_into_parts(input, part_count).unwrap();

                assert!(parts.iter().all(|p| !p.is_empty()));
                assert!(parts.len() <= part_count.max(1).min(len));
                assert_eq!(parts.concat(), expected, "len={len} parts={part_count}");
            }
        }
    }
}
