use serde::Serialize;

use super::estimate::Estimate;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResult {
    pub participant_id: String,
    pub participant_name: String,
    pub vote: Estimate,
    pub is_highest: bool,
    pub is_lowest: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    pub total_votes: usize,
    pub average: f64,
    pub results: Vec<VoteResult>,
}

/// Totals, average and extremes for one round.
///
/// `votes` pairs each voter's id and display name with their card, in the
/// order results should be listed. Only numeric cards count towards the
/// average and the highest/lowest flags, and the flags need at least two
/// numeric votes; every vote tied at an extreme is flagged.
pub fn tally<'a, I>(votes: I) -> Tally
where
    I: IntoIterator<Item = (&'a str, &'a str, Estimate)>,
{
    let votes: Vec<_> = votes.into_iter().collect();
    let numeric: Vec<u32> = votes
        .iter()
        .filter_map(|(_, _, e)| e.points().map(u32::from))
        .collect();

    let average = if numeric.is_empty() {
        0.0
    } else {
        let mean = numeric.iter().sum::<u32>() as f64 / numeric.len() as f64;
        (mean * 100.0).round() / 100.0
    };

    let extremes = (numeric.len() > 1).then(|| {
        let max = numeric.iter().copied().max().unwrap_or_default();
        let min = numeric.iter().copied().min().unwrap_or_default();
        (max, min)
    });

    let results = votes
        .iter()
        .map(|&(id, name, vote)| {
            let points = vote.points().map(u32::from);
            let (is_highest, is_lowest) = match (extremes, points) {
                (Some((max, min)), Some(p)) => (p == max, p == min),
                _ => (false, false),
            };
            VoteResult {
                participant_id: id.to_owned(),
                participant_name: name.to_owned(),
                vote,
                is_highest,
                is_lowest,
            }
        })
        .collect();

    Tally { total_votes: votes.len(), average, results }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Estimate::*;

    fn flags(t: &Tally) -> Vec<(bool, bool)> {
        t.results.iter().map(|r| (r.is_highest, r.is_lowest)).collect()
    }

    #[test]
    fn empty_round() {
        let t = tally(Vec::<(&str, &str, Estimate)>::new());
        assert_eq!(t.total_votes, 0);
        assert_eq!(t.average, 0.0);
        assert!(t.results.is_empty());
    }

    #[test]
    fn sentinels_count_but_do_not_average() {
        let t = tally([("a", "Ann", Points(5)), ("b", "Bob", Points(8)), ("c", "Cy", Unknown)]);
        assert_eq!(t.total_votes, 3);
        assert_eq!(t.average, 6.5);
        assert_eq!(flags(&t), [(false, true), (true, false), (false, false)]);
        assert_eq!(t.results[2].participant_name, "Cy");
    }

    #[test]
    fn only_sentinels_average_zero() {
        let t = tally([("a", "Ann", Infinity), ("b", "Bob", Unknown)]);
        assert_eq!(t.total_votes, 2);
        assert_eq!(t.average, 0.0);
        assert_eq!(flags(&t), [(false, false), (false, false)]);
    }

    #[test]
    fn lone_numeric_vote_is_not_highlighted() {
        let t = tally([("a", "Ann", Points(13)), ("b", "Bob", Infinity)]);
        assert_eq!(t.average, 13.0);
        assert_eq!(flags(&t), [(false, false), (false, false)]);
    }

    #[test]
    fn ties_flag_everyone_at_the_extreme() {
        let t = tally([
            ("a", "Ann", Points(3)),
            ("b", "Bob", Points(8)),
            ("c", "Cy", Points(3)),
            ("d", "Di", Points(8)),
        ]);
        assert_eq!(flags(&t), [(false, true), (true, false), (false, true), (true, false)]);
    }

    #[test]
    fn unanimous_votes_are_both_extremes() {
        let t = tally([("a", "Ann", Points(5)), ("b", "Bob", Points(5))]);
        assert_eq!(flags(&t), [(true, true), (true, true)]);
    }

    #[test]
    fn average_rounds_to_two_places() {
        let t = tally([("a", "A", Points(1)), ("b", "B", Points(1)), ("c", "C", Points(2))]);
        assert_eq!(t.average, 1.33);
        let t = tally([("a", "A", Points(0)), ("b", "B", Points(1)), ("c", "C", Points(1))]);
        assert_eq!(t.average, 0.67);
    }
}
