use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tgen_core::{CollaboratorError, CollaboratorResult, ScriptCompiler, StageContext, TestCase};

/// One generated test file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptFile {
    pub case_id: String,
    pub path: String,
    pub content: String,
}

/// Payload shape shared by `ShellScriptCompiler` and `DryRunExecutor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptBundle {
    pub runner: String,
    pub files: Vec<ScriptFile>,
}

/// Renders each approved case as a POSIX shell test under `tests/tgen/`.
#[derive(Default)]
pub struct ShellScriptCompiler;

impl ShellScriptCompiler {
    fn render(case: &TestCase) -> String {
        format!(
            "#!/bin/sh\n# {}\nset -eu\nINPUT='{}'\nEXPECTED='{}'\necho \"case {} input=$INPUT expected=$EXPECTED\"\n",
            case.description,
            case.input.to_string().replace('\'', ""),
            case.expected.to_string().replace('\'', ""),
            case.id,
        )
    }
}

#[async_trait]
impl ScriptCompiler for ShellScriptCompiler {
    async fn compile(
        &self,
        ctx: &StageContext,
        approved: &[TestCase],
    ) -> CollaboratorResult<serde_json::Value> {
        if approved.is_empty() {
            return Err(CollaboratorError::new("no approved test cases to compile"));
        }
        let bundle = ScriptBundle {
            runner: "sh".to_string(),
            files: approved
                .iter()
                .map(|case| ScriptFile {
                    case_id: case.id.clone(),
                    path: format!("tests/tgen/{}.sh", case.id),
                    content: Self::render(case),
                })
                .collect(),
        };
        tracing::debug!(run_id = %ctx.run_id, files = bundle.files.len(), "Scripts compiled");
        serde_json::to_value(&bundle).map_err(|e| CollaboratorError::new(e.to_string()))
    }
}
