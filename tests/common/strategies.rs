//! proptest strategies for generating plannable executions

use super::builders::{canary_stage, deploy_stage, pipeline, stage};
use proptest::prelude::*;
use serde_json::json;
use stagehand_core::models::Execution;

/// Stage types the shared registry can plan
pub fn stage_type_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("wait"), Just("bake"), Just("deploy"), Just("canary"), Just("poll")]
}

pub fn region_list_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{2}-(east|west)-[1-3]", 1..5)
}

pub fn stage_name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 _.-]{0,20}"
}

/// A linear pipeline; each stage optionally asks for an execution window
pub fn linear_pipeline_strategy() -> impl Strategy<Value = Execution> {
    prop::collection::vec(
        (stage_type_strategy(), region_list_strategy(), any::<bool>(), stage_name_strategy()),
        1..6,
    )
    .prop_map(|specs| {
        let stages = specs
            .into_iter()
            .enumerate()
            .map(|(index, (stage_type, regions, windowed, name))| {
                let id = format!("stage{index}");
                let ref_id = (index + 1).to_string();
                let previous = index.to_string();
                let requisites: Vec<&str> = if index == 0 { vec![] } else { vec![previous.as_str()] };

                let regions: Vec<&str> = regions.iter().map(String::as_str).collect();
                let mut built = match stage_type {
                    "deploy" => deploy_stage(&id, &ref_id, &regions).with_requisite_stage_ref_ids(requisites),
                    "canary" => canary_stage(&id, &ref_id, &regions).with_requisite_stage_ref_ids(requisites),
                    _ => stage(&id, &ref_id, stage_type, &requisites),
                };
                built.name = name;
                if windowed {
                    built
                        .context
                        .insert("restrictExecutionDuringTimeWindow".to_string(), json!(true));
                }
                built
            })
            .collect();
        pipeline("generated", stages)
    })
}
