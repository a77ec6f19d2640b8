//! Research-angle generation and ranking

use super::types::{PaperAnalysis, ResearchAngle};
use crate::errors::{AppError, Result};
use crate::llm::{parse_json_reply, ChatRequest, LanguageModel, Purpose};
use serde::Deserialize;

/// Angles returned to the caller
pub const TOP_ANGLES: usize = 3;

pub const MAX_SCORE: f64 = 10.0;

const ANGLES_SYSTEM_PROMPT: &str = "You are a senior researcher helping refine a research \
idea. Using the paper analyses provided, propose distinct research angles that address gaps \
or limitations in the existing work. Reply with a JSON object {\"angles\": [...]} where each \
angle has \"title\", \"description\", \"novelty\", \"practicality\" and \"impact\" (numbers \
from 0 to 10), \"reasoning\", \"briefPlan\" (array of steps) and \"relatedLimitations\" \
(array of strings).";

#[derive(Deserialize)]
struct AnglesReply {
    #[serde(default)]
    angles: Vec<ResearchAngle>,
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, MAX_SCORE)
    }
}

/// Clamp the axes, derive `overall_score`, keep the best `TOP_ANGLES`
///
/// The sort is stable, so equal scores keep the model's order.
pub fn rank_angles(angles: Vec<ResearchAngle>) -> Vec<ResearchAngle> {
    let mut ranked: Vec<ResearchAngle> = angles
        .into_iter()
        .map(|mut angle| {
            angle.novelty = clamp_score(angle.novelty);
            angle.practicality = clamp_score(angle.practicality);
            angle.impact = clamp_score(angle.impact);
            let mean = (angle.novelty + angle.practicality + angle.impact) / 3.0;
            angle.overall_score = (mean * 100.0).round() / 100.0;
            angle
        })
        .collect();

    ranked.sort_by(|a, b| b.overall_score.total_cmp(&a.overall_score));
    ranked.truncate(TOP_ANGLES);
    ranked
}

pub(crate) async fn generate_angles(
    llm: &dyn LanguageModel,
    idea: &str,
    papers: &[PaperAnalysis],
) -> Result<Vec<ResearchAngle>> {
    let analyses = serde_json::to_string_pretty(papers)?;
    let raw = llm
        .complete(&ChatRequest {
            purpose: Purpose::AngleGeneration,
            system: ANGLES_SYSTEM_PROMPT.to_string(),
            user: format!(
                "Research idea:\n{}\n\nAnalyses of related papers:\n{}",
                idea, analyses
            ),
            max_tokens: 2000,
            temperature: 0.7,
            json: true,
        })
        .await?;

    let reply: AnglesReply = parse_json_reply(&raw)?;
    if reply.angles.is_empty() {
        return Err(AppError::LlmError {
            message: "model returned no research angles".to_string(),
        });
    }

    Ok(rank_angles(reply.angles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLanguageModel;

    fn angle(title: &str, n: f64, p: f64, i: f64) -> ResearchAngle {
        ResearchAngle {
            title: title.to_string(),
            description: String::new(),
            novelty: n,
            practicality: p,
            impact: i,
            overall_score: 0.0,
            reasoning: String::new(),
            brief_plan: vec![],
            related_limitations: vec![],
        }
    }

    #[test]
    fn test_rank_clamps_and_derives_score() {
        let ranked = rank_angles(vec![angle("wild", 15.0, -3.0, f64::NAN)]);
        assert_eq!(ranked[0].novelty, 10.0);
        assert_eq!(ranked[0].practicality, 0.0);
        assert_eq!(ranked[0].impact, 0.0);
        assert_eq!(ranked[0].overall_score, 3.33);
    }

    #[test]
    fn test_rank_keeps_top_three_stable() {
        let ranked = rank_angles(vec![
            angle("low", 1.0, 1.0, 1.0),
            angle("tie-a", 6.0, 6.0, 6.0),
            angle("high", 9.0, 9.0, 9.0),
            angle("tie-b", 6.0, 6.0, 6.0),
        ]);
        let titles: Vec<&str> = ranked.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["high", "tie-a", "tie-b"]);
    }

    #[tokio::test]
    async fn test_generate_from_canned_reply() {
        let llm = MockLanguageModel::canned();
        let angles = generate_angles(&llm, "idea", &[]).await.unwrap();

        assert_eq!(angles.len(), TOP_ANGLES);
        assert_eq!(angles[0].title, "Multilingual evaluation");
        assert_eq!(angles[1].title, "Theoretical grounding");
        assert!(angles
            .windows(2)
            .all(|w| w[0].overall_score >= w[1].overall_score));
    }

    #[tokio::test]
    async fn test_empty_angles_is_an_error() {
        let llm = MockLanguageModel::new(|_| Ok(r#"{"angles": []}"#.to_string()));
        assert!(generate_angles(&llm, "idea", &[]).await.is_err());
    }
}
