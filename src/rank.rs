use crate::calc::round_off_1_decimal;
use crate::workflow::ResultStatus;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct RankInput {
    pub id: String,
    pub grand_total: f64,
    pub status: ResultStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRow {
    pub id: String,
    pub grand_total: f64,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub class_average: f64,
    pub highest: f64,
    pub lowest: f64,
    pub ranked_count: usize,
}

/// Competition ranking over grand totals, descending. Equal totals share a
/// position and the next distinct total resumes at the count of rows ranked
/// so far (1,2,2,4, never 1,2,2,3). Draft rows do not participate; only
/// approved and published results count toward positions and class stats.
pub fn rank_results(inputs: &[RankInput]) -> (Vec<RankedRow>, ClassStats) {
    let mut participating: Vec<&RankInput> = inputs
        .iter()
        .filter(|r| r.status != ResultStatus::Draft)
        .collect();
    participating.sort_by(|a, b| {
        b.grand_total
            .partial_cmp(&a.grand_total)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut ranked = Vec::with_capacity(participating.len());
    let mut position = 0_i64;
    let mut prev_total: Option<f64> = None;
    for (i, row) in participating.iter().enumerate() {
        if prev_total != Some(row.grand_total) {
            position = i as i64 + 1;
            prev_total = Some(row.grand_total);
        }
        ranked.push(RankedRow {
            id: row.id.clone(),
            grand_total: row.grand_total,
            position,
        });
    }

    let stats = if participating.is_empty() {
        ClassStats {
            class_average: 0.0,
            highest: 0.0,
            lowest: 0.0,
            ranked_count: 0,
        }
    } else {
        let sum: f64 = participating.iter().map(|r| r.grand_total).sum();
        let highest = participating
            .iter()
            .map(|r| r.grand_total)
            .fold(f64::MIN, f64::max);
        let lowest = participating
            .iter()
            .map(|r| r.grand_total)
            .fold(f64::MAX, f64::min);
        ClassStats {
            class_average: round_off_1_decimal(sum / participating.len() as f64),
            highest,
            lowest,
            ranked_count: participating.len(),
        }
    };

    (ranked, stats)
}

/// Same tie-break over arbitrary (id, score) pairs, used for term-report
/// positions across students.
pub fn competition_positions(entries: &[(String, f64)]) -> Vec<(String, i64)> {
    let inputs: Vec<RankInput> = entries
        .iter()
        .map(|(id, score)| RankInput {
            id: id.clone(),
            grand_total: *score,
            status: ResultStatus::Approved,
        })
        .collect();
    rank_results(&inputs)
        .0
        .into_iter()
        .map(|r| (r.id, r.position))
        .collect()
}
