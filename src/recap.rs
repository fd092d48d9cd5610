use std::collections::{BTreeMap, HashMap};

use anyhow::bail;
use uuid::Uuid;

use crate::models::{
    AspectLeaders, AspectScore, AspectWeight, ChartEntry, CrewMember, Gender, PeerAssessment,
    RecapOutput, RecapRow, Role, SupervisorAssessment,
};

/// Peer-rating blend vs supervisor blend in the final score.
const CREW_WEIGHT: f64 = 0.6;
const SUPERVISOR_WEIGHT: f64 = 0.4;

/// Aggregates one period's ratings into ranked scorecards plus per-aspect
/// best-performer leaderboards. Pure: no I/O, no clock, identical inputs give
/// identical output. Out-of-range ratings, scores, or weights are rejected
/// outright rather than silently folded into the math.
pub fn compute_recap(
    roster: &[CrewMember],
    peer_assessments: &[PeerAssessment],
    supervisor_assessments: &[SupervisorAssessment],
    weights: &[AspectWeight],
    aspect_order: &[&str],
) -> anyhow::Result<RecapOutput> {
    validate_inputs(peer_assessments, supervisor_assessments, weights)?;

    let mut assessments_by_crew: HashMap<Uuid, Vec<&PeerAssessment>> = HashMap::new();
    for assessment in peer_assessments {
        assessments_by_crew
            .entry(assessment.assessed_id)
            .or_default()
            .push(assessment);
    }

    // Arrival order of the input slice defines the "Spv 1"/"Spv 2" slots.
    let mut supervisor_scores_by_crew: HashMap<Uuid, Vec<f64>> = HashMap::new();
    for assessment in supervisor_assessments {
        supervisor_scores_by_crew
            .entry(assessment.assessed_crew_id)
            .or_default()
            .push(assessment.score);
    }

    let mut weight_table: HashMap<(Role, Gender, &str), f64> = HashMap::new();
    for weight in weights {
        weight_table.insert(
            (weight.role, weight.gender, weight.aspect_key.as_str()),
            weight.max_score,
        );
    }

    // Supervisors rate, they are never ranked subjects.
    let subjects: Vec<&CrewMember> = roster
        .iter()
        .filter(|member| member.is_active && member.role != Role::Supervisor)
        .collect();

    let mut crew_per_outlet: HashMap<Uuid, usize> = HashMap::new();
    for member in &subjects {
        if let Some(outlet_id) = member.outlet_id {
            *crew_per_outlet.entry(outlet_id).or_insert(0) += 1;
        }
    }

    let mut rows: Vec<RecapRow> = subjects
        .iter()
        .map(|member| {
            let received = assessments_by_crew
                .get(&member.id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let supervisor_scores = supervisor_scores_by_crew
                .get(&member.id)
                .cloned()
                .unwrap_or_default();
            // Excludes self; 0 when the member has no outlet on record.
            let potential_assessors = member
                .outlet_id
                .and_then(|outlet_id| crew_per_outlet.get(&outlet_id).copied())
                .unwrap_or(0)
                .saturating_sub(1);
            score_member(
                member,
                received,
                &supervisor_scores,
                &weight_table,
                aspect_order,
                potential_assessors,
            )
        })
        .collect();

    // Stable sort: ties keep roster order.
    rows.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (index, row) in rows.iter_mut().enumerate() {
        row.rank = index + 1;
    }

    let charts = build_charts(&rows, aspect_order);

    Ok(RecapOutput { rows, charts })
}

fn validate_inputs(
    peer_assessments: &[PeerAssessment],
    supervisor_assessments: &[SupervisorAssessment],
    weights: &[AspectWeight],
) -> anyhow::Result<()> {
    for assessment in peer_assessments {
        for (aspect_key, rating) in &assessment.scores {
            if !(1..=5).contains(rating) {
                bail!(
                    "peer rating {rating} for aspect '{aspect_key}' is outside the 1-5 scale"
                );
            }
        }
    }
    for assessment in supervisor_assessments {
        if !(0.0..=100.0).contains(&assessment.score) {
            bail!(
                "supervisor score {} is outside the 0-100 scale",
                assessment.score
            );
        }
    }
    for weight in weights {
        if weight.max_score < 0.0 {
            bail!(
                "weight for ({}, {}, {}) is negative",
                weight.role,
                weight.gender,
                weight.aspect_key
            );
        }
    }
    Ok(())
}

fn score_member(
    member: &CrewMember,
    received: &[&PeerAssessment],
    supervisor_scores: &[f64],
    weight_table: &HashMap<(Role, Gender, &str), f64>,
    aspect_order: &[&str],
    potential_assessors: usize,
) -> RecapRow {
    let mut ratings_by_aspect: BTreeMap<&str, Vec<i32>> = BTreeMap::new();
    for assessment in received {
        for (aspect_key, rating) in &assessment.scores {
            ratings_by_aspect
                .entry(aspect_key.as_str())
                .or_default()
                .push(*rating);
        }
    }

    // Canonical order first, then any aspect key the order list does not know.
    let mut ordered_keys: Vec<&str> = aspect_order
        .iter()
        .copied()
        .filter(|key| ratings_by_aspect.contains_key(key))
        .collect();
    for &key in ratings_by_aspect.keys() {
        if !aspect_order.contains(&key) {
            ordered_keys.push(key);
        }
    }

    let mut crew_score = 0.0;
    let mut aspect_scores = Vec::with_capacity(ordered_keys.len());
    for key in ordered_keys {
        let ratings = &ratings_by_aspect[key];
        let mean = ratings.iter().sum::<i32>() as f64 / ratings.len() as f64;
        let max_score = weight_table
            .get(&(member.role, member.gender, key))
            .copied()
            .unwrap_or(0.0);
        let weighted = (mean / 5.0) * max_score;
        crew_score += weighted;
        aspect_scores.push(AspectScore {
            aspect_key: key.to_string(),
            score: weighted,
            max_score,
        });
    }

    let supervisor_average = if supervisor_scores.is_empty() {
        0.0
    } else {
        supervisor_scores.iter().sum::<f64>() / supervisor_scores.len() as f64
    };

    let final_score = CREW_WEIGHT * crew_score + SUPERVISOR_WEIGHT * supervisor_average;

    RecapRow {
        crew_id: member.id,
        full_name: member.full_name.clone(),
        outlet: member
            .outlet_name
            .clone()
            .unwrap_or_else(|| "N/A".to_string()),
        role: member.role,
        aspect_scores,
        crew_score,
        supervisor_scores: supervisor_scores.to_vec(),
        supervisor_average,
        final_score,
        rank: 0,
        actual_assessors: received.len(),
        potential_assessors,
    }
}

fn build_charts(rows: &[RecapRow], aspect_order: &[&str]) -> Vec<AspectLeaders> {
    aspect_order
        .iter()
        .map(|key| {
            let mut entries: Vec<ChartEntry> = rows
                .iter()
                .filter_map(|row| {
                    row.aspect_scores
                        .iter()
                        .find(|aspect| aspect.aspect_key == *key)
                        .map(|aspect| ChartEntry {
                            name: first_name_token(&row.full_name),
                            score: aspect.score,
                        })
                })
                .collect();
            entries.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            entries.truncate(3);
            AspectLeaders {
                aspect_key: key.to_string(),
                leaders: entries,
            }
        })
        .collect()
}

fn first_name_token(full_name: &str) -> String {
    full_name
        .split_whitespace()
        .next()
        .unwrap_or(full_name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ASPECT_ORDER;

    fn member(name: &str, role: Role, gender: Gender, outlet_id: Option<Uuid>) -> CrewMember {
        CrewMember {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            role,
            gender,
            outlet_id,
            outlet_name: outlet_id.map(|_| "Outlet Utama".to_string()),
            is_active: true,
        }
    }

    fn rating_of(assessed_id: Uuid, scores: &[(&str, i32)]) -> PeerAssessment {
        PeerAssessment {
            assessed_id,
            scores: scores
                .iter()
                .map(|(key, value)| (key.to_string(), *value))
                .collect(),
        }
    }

    fn weight(role: Role, gender: Gender, aspect_key: &str, max_score: f64) -> AspectWeight {
        AspectWeight {
            role,
            gender,
            aspect_key: aspect_key.to_string(),
            max_score,
        }
    }

    fn spv_score(assessed_crew_id: Uuid, score: f64) -> SupervisorAssessment {
        SupervisorAssessment {
            assessed_crew_id,
            score,
        }
    }

    #[test]
    fn unrated_crew_scores_zero_with_no_aspect_entries() {
        let outlet = Uuid::new_v4();
        let roster = vec![member("Sari Dewi", Role::Crew, Gender::Female, Some(outlet))];
        let weights = vec![weight(Role::Crew, Gender::Female, "cashier", 20.0)];

        let output = compute_recap(&roster, &[], &[], &weights, &ASPECT_ORDER).unwrap();

        assert_eq!(output.rows.len(), 1);
        let row = &output.rows[0];
        assert_eq!(row.crew_score, 0.0);
        assert!(row.aspect_scores.is_empty());
        assert_eq!(row.final_score, 0.0);
        assert_eq!(row.actual_assessors, 0);
    }

    #[test]
    fn single_rating_scales_to_the_aspect_weight() {
        let outlet = Uuid::new_v4();
        let subject = member("Budi Santoso", Role::Crew, Gender::Male, Some(outlet));
        let subject_id = subject.id;
        let weights = vec![weight(Role::Crew, Gender::Male, "cashier", 20.0)];
        let assessments = vec![rating_of(subject_id, &[("cashier", 4)])];

        let output =
            compute_recap(&[subject], &assessments, &[], &weights, &ASPECT_ORDER).unwrap();

        let row = &output.rows[0];
        assert_eq!(row.aspect_scores.len(), 1);
        assert!((row.aspect_scores[0].score - 16.0).abs() < 1e-9);
        assert!((row.crew_score - 16.0).abs() < 1e-9);
    }

    #[test]
    fn final_score_blends_sixty_forty() {
        let outlet = Uuid::new_v4();
        let subject = member("Budi Santoso", Role::Crew, Gender::Male, Some(outlet));
        let subject_id = subject.id;
        // One rating of 5 against a weight of 50 puts the crew score at exactly 50.
        let weights = vec![weight(Role::Crew, Gender::Male, "cashier", 50.0)];
        let assessments = vec![rating_of(subject_id, &[("cashier", 5)])];
        let supervisors = vec![spv_score(subject_id, 80.0), spv_score(subject_id, 90.0)];

        let output = compute_recap(
            &[subject],
            &assessments,
            &supervisors,
            &weights,
            &ASPECT_ORDER,
        )
        .unwrap();

        let row = &output.rows[0];
        assert!((row.crew_score - 50.0).abs() < 1e-9);
        assert!((row.supervisor_average - 85.0).abs() < 1e-9);
        assert!((row.final_score - 64.0).abs() < 1e-9);
        assert!(
            (row.final_score - (0.6 * row.crew_score + 0.4 * row.supervisor_average)).abs()
                < 1e-9
        );
    }

    #[test]
    fn supervisor_average_over_zero_one_and_two_scores() {
        let outlet = Uuid::new_v4();
        let a = member("Aulia", Role::Crew, Gender::Female, Some(outlet));
        let b = member("Bima", Role::Crew, Gender::Male, Some(outlet));
        let c = member("Citra", Role::Crew, Gender::Female, Some(outlet));
        let supervisors = vec![
            spv_score(b.id, 70.0),
            spv_score(c.id, 60.0),
            spv_score(c.id, 90.0),
        ];
        let ids = (a.id, b.id, c.id);

        let output =
            compute_recap(&[a, b, c], &[], &supervisors, &[], &ASPECT_ORDER).unwrap();

        let average_of = |id: Uuid| {
            output
                .rows
                .iter()
                .find(|row| row.crew_id == id)
                .unwrap()
                .supervisor_average
        };
        assert_eq!(average_of(ids.0), 0.0);
        assert_eq!(average_of(ids.1), 70.0);
        assert_eq!(average_of(ids.2), 75.0);
    }

    #[test]
    fn engine_exposes_every_supervisor_score_and_averages_all() {
        let outlet = Uuid::new_v4();
        let subject = member("Dian", Role::Crew, Gender::Female, Some(outlet));
        let subject_id = subject.id;
        let supervisors = vec![
            spv_score(subject_id, 60.0),
            spv_score(subject_id, 70.0),
            spv_score(subject_id, 80.0),
        ];

        let output =
            compute_recap(&[subject], &[], &supervisors, &[], &ASPECT_ORDER).unwrap();

        let row = &output.rows[0];
        assert_eq!(row.supervisor_scores, vec![60.0, 70.0, 80.0]);
        assert!((row.supervisor_average - 70.0).abs() < 1e-9);
    }

    #[test]
    fn ranking_descends_by_final_score() {
        let outlet = Uuid::new_v4();
        let a = member("Aulia", Role::Crew, Gender::Female, Some(outlet));
        let b = member("Bima", Role::Crew, Gender::Male, Some(outlet));
        let c = member("Citra", Role::Crew, Gender::Female, Some(outlet));
        let supervisors = vec![
            spv_score(a.id, 40.0),
            spv_score(b.id, 90.0),
            spv_score(c.id, 65.0),
        ];

        let output =
            compute_recap(&[a, b, c], &[], &supervisors, &[], &ASPECT_ORDER).unwrap();

        assert_eq!(output.rows[0].full_name, "Bima");
        assert_eq!(output.rows[1].full_name, "Citra");
        assert_eq!(output.rows[2].full_name, "Aulia");
        for (index, row) in output.rows.iter().enumerate() {
            assert_eq!(row.rank, index + 1);
        }
        for pair in output.rows.windows(2) {
            assert!(pair[0].final_score >= pair[1].final_score);
        }
    }

    #[test]
    fn tied_scores_keep_roster_order() {
        let outlet = Uuid::new_v4();
        let first = member("Eka", Role::Crew, Gender::Male, Some(outlet));
        let second = member("Fajar", Role::Crew, Gender::Male, Some(outlet));
        let supervisors = vec![spv_score(first.id, 75.0), spv_score(second.id, 75.0)];

        let output = compute_recap(
            &[first, second],
            &[],
            &supervisors,
            &[],
            &ASPECT_ORDER,
        )
        .unwrap();

        assert_eq!(output.rows[0].full_name, "Eka");
        assert_eq!(output.rows[1].full_name, "Fajar");
    }

    #[test]
    fn recap_is_a_pure_function_of_its_inputs() {
        let outlet = Uuid::new_v4();
        let a = member("Gita Lestari", Role::Crew, Gender::Female, Some(outlet));
        let b = member("Hadi Pranoto", Role::Leader, Gender::Male, Some(outlet));
        let weights = vec![
            weight(Role::Crew, Gender::Female, "packing", 15.0),
            weight(Role::Leader, Gender::Male, "leadership", 25.0),
        ];
        let assessments = vec![
            rating_of(a.id, &[("packing", 3)]),
            rating_of(b.id, &[("leadership", 5)]),
        ];
        let supervisors = vec![spv_score(a.id, 82.0)];
        let roster = vec![a, b];

        let once = compute_recap(&roster, &assessments, &supervisors, &weights, &ASPECT_ORDER)
            .unwrap();
        let twice = compute_recap(&roster, &assessments, &supervisors, &weights, &ASPECT_ORDER)
            .unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn supervisors_and_inactive_crew_are_never_ranked() {
        let outlet = Uuid::new_v4();
        let active = member("Indah", Role::Crew, Gender::Female, Some(outlet));
        let supervisor = member("Joko", Role::Supervisor, Gender::Male, Some(outlet));
        let mut inactive = member("Kartika", Role::Crew, Gender::Female, Some(outlet));
        inactive.is_active = false;

        let output = compute_recap(
            &[active, supervisor, inactive],
            &[],
            &[],
            &[],
            &ASPECT_ORDER,
        )
        .unwrap();

        assert_eq!(output.rows.len(), 1);
        assert_eq!(output.rows[0].full_name, "Indah");
    }

    #[test]
    fn completion_counts_peers_in_the_same_outlet() {
        let outlet = Uuid::new_v4();
        let other_outlet = Uuid::new_v4();
        let mut roster: Vec<CrewMember> = (0..5)
            .map(|n| member(&format!("Crew {n}"), Role::Crew, Gender::Male, Some(outlet)))
            .collect();
        roster.push(member("Luar", Role::Crew, Gender::Male, Some(other_outlet)));
        let subject_id = roster[0].id;
        let assessments = vec![
            rating_of(subject_id, &[("cashier", 4)]),
            rating_of(subject_id, &[("cashier", 5)]),
        ];

        let output = compute_recap(&roster, &assessments, &[], &[], &ASPECT_ORDER).unwrap();

        let row = output
            .rows
            .iter()
            .find(|row| row.crew_id == subject_id)
            .unwrap();
        assert_eq!(row.potential_assessors, 4);
        assert_eq!(row.actual_assessors, 2);
        assert!((row.completion_percent() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn crew_without_an_outlet_has_no_potential_assessors() {
        let stray = member("Mandiri", Role::Crew, Gender::Male, None);

        let output = compute_recap(&[stray], &[], &[], &[], &ASPECT_ORDER).unwrap();

        assert_eq!(output.rows[0].potential_assessors, 0);
    }

    #[test]
    fn rated_aspect_without_a_weight_row_counts_for_nothing() {
        // leadership carries no weight for plain crew; the entry still shows up
        // so the caller can render the gap.
        let outlet = Uuid::new_v4();
        let subject = member("Nina", Role::Crew, Gender::Female, Some(outlet));
        let subject_id = subject.id;
        let assessments = vec![rating_of(subject_id, &[("leadership", 5)])];

        let output = compute_recap(&[subject], &assessments, &[], &[], &ASPECT_ORDER).unwrap();

        let row = &output.rows[0];
        assert_eq!(row.aspect_scores.len(), 1);
        assert_eq!(row.aspect_scores[0].aspect_key, "leadership");
        assert_eq!(row.aspect_scores[0].score, 0.0);
        assert_eq!(row.aspect_scores[0].max_score, 0.0);
        assert_eq!(row.crew_score, 0.0);
    }

    #[test]
    fn aspect_entries_follow_the_canonical_order() {
        let outlet = Uuid::new_v4();
        let subject = member("Putri", Role::Leader, Gender::Female, Some(outlet));
        let subject_id = subject.id;
        let weights = vec![
            weight(Role::Leader, Gender::Female, "leadership", 25.0),
            weight(Role::Leader, Gender::Female, "cleanliness", 10.0),
            weight(Role::Leader, Gender::Female, "cashier", 20.0),
        ];
        let assessments = vec![rating_of(
            subject_id,
            &[("cleanliness", 4), ("leadership", 5), ("cashier", 3)],
        )];

        let output =
            compute_recap(&[subject], &assessments, &[], &weights, &ASPECT_ORDER).unwrap();

        let keys: Vec<&str> = output.rows[0]
            .aspect_scores
            .iter()
            .map(|aspect| aspect.aspect_key.as_str())
            .collect();
        assert_eq!(keys, vec!["leadership", "cashier", "cleanliness"]);
    }

    #[test]
    fn leaderboards_cap_at_three_and_sort_descending() {
        let outlet = Uuid::new_v4();
        let roster: Vec<CrewMember> = ["Ayu S", "Bayu T", "Cahya U", "Dewa V", "Endra W"]
            .iter()
            .map(|name| member(name, Role::Crew, Gender::Male, Some(outlet)))
            .collect();
        let weights = vec![weight(Role::Crew, Gender::Male, "packing", 10.0)];
        let assessments: Vec<PeerAssessment> = roster
            .iter()
            .zip([1, 2, 3, 4, 5])
            .map(|(member, rating)| rating_of(member.id, &[("packing", rating)]))
            .collect();

        let output =
            compute_recap(&roster, &assessments, &[], &weights, &ASPECT_ORDER).unwrap();

        let packing = output
            .charts
            .iter()
            .find(|chart| chart.aspect_key == "packing")
            .unwrap();
        assert_eq!(packing.leaders.len(), 3);
        assert_eq!(packing.leaders[0].name, "Endra");
        assert!(packing.leaders[0].score >= packing.leaders[1].score);
        assert!(packing.leaders[1].score >= packing.leaders[2].score);

        for chart in &output.charts {
            assert!(chart.leaders.len() <= 3);
        }
        let chart_keys: Vec<&str> = output
            .charts
            .iter()
            .map(|chart| chart.aspect_key.as_str())
            .collect();
        assert_eq!(chart_keys, ASPECT_ORDER.to_vec());
    }

    #[test]
    fn leaderboard_names_are_first_name_tokens() {
        let outlet = Uuid::new_v4();
        let subject = member("Rizky Ahmad Fauzi", Role::Crew, Gender::Male, Some(outlet));
        let subject_id = subject.id;
        let weights = vec![weight(Role::Crew, Gender::Male, "cashier", 20.0)];
        let assessments = vec![rating_of(subject_id, &[("cashier", 5)])];

        let output =
            compute_recap(&[subject], &assessments, &[], &weights, &ASPECT_ORDER).unwrap();

        let cashier = output
            .charts
            .iter()
            .find(|chart| chart.aspect_key == "cashier")
            .unwrap();
        assert_eq!(cashier.leaders[0].name, "Rizky");
    }

    #[test]
    fn out_of_range_peer_rating_is_rejected() {
        let outlet = Uuid::new_v4();
        let subject = member("Sinta", Role::Crew, Gender::Female, Some(outlet));
        let subject_id = subject.id;

        for bad in [0, 6] {
            let assessments = vec![rating_of(subject_id, &[("cashier", bad)])];
            let result =
                compute_recap(&[subject.clone()], &assessments, &[], &[], &ASPECT_ORDER);
            assert!(result.is_err(), "rating {bad} should be rejected");
        }
    }

    #[test]
    fn out_of_range_supervisor_score_is_rejected() {
        let outlet = Uuid::new_v4();
        let subject = member("Tono", Role::Crew, Gender::Male, Some(outlet));
        let subject_id = subject.id;

        for bad in [-1.0, 100.5] {
            let supervisors = vec![spv_score(subject_id, bad)];
            let result =
                compute_recap(&[subject.clone()], &[], &supervisors, &[], &ASPECT_ORDER);
            assert!(result.is_err(), "score {bad} should be rejected");
        }
    }

    #[test]
    fn negative_weight_is_rejected() {
        let weights = vec![weight(Role::Crew, Gender::Male, "cashier", -5.0)];
        let result = compute_recap(&[], &[], &[], &weights, &ASPECT_ORDER);
        assert!(result.is_err());
    }

    #[test]
    fn aspect_mean_is_over_received_ratings_only() {
        let outlet = Uuid::new_v4();
        let subject = member("Umar", Role::Crew, Gender::Male, Some(outlet));
        let subject_id = subject.id;
        let weights = vec![
            weight(Role::Crew, Gender::Male, "cashier", 20.0),
            weight(Role::Crew, Gender::Male, "packing", 10.0),
        ];
        // Two raters scored cashier, only one bothered with packing.
        let assessments = vec![
            rating_of(subject_id, &[("cashier", 4), ("packing", 5)]),
            rating_of(subject_id, &[("cashier", 2)]),
        ];

        let output =
            compute_recap(&[subject], &assessments, &[], &weights, &ASPECT_ORDER).unwrap();

        let row = &output.rows[0];
        let cashier = row
            .aspect_scores
            .iter()
            .find(|aspect| aspect.aspect_key == "cashier")
            .unwrap();
        let packing = row
            .aspect_scores
            .iter()
            .find(|aspect| aspect.aspect_key == "packing")
            .unwrap();
        assert!((cashier.score - (3.0 / 5.0) * 20.0).abs() < 1e-9);
        assert!((packing.score - (5.0 / 5.0) * 10.0).abs() < 1e-9);
        assert!((row.crew_score - (12.0 + 10.0)).abs() < 1e-9);
    }
}
