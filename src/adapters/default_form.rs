//! Default form-POST adapter (spec §4.3.1): uploads using whatever
//! instructions the control plane attached to the artifact at
//! registration time. No destination-string configuration of its own.

use std::sync::Arc;

use reqwest::Client;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::{
    artifact::{Artifact, WorkUnit, WorkUnitKind},
    error::{ConfigurationError, TransferError},
};

use super::{check_status, part_range};

#[derive(Debug, Default)]
pub struct DefaultFormAdapter;

impl DefaultFormAdapter {
    pub fn new() -> Self {
        Self
    }

    /// The control plane issues the URL; nothing is synthesized locally.
    pub fn url(&self, artifact: &Artifact) -> String {
        (*artifact.url).clone().unwrap_or_default()
    }

    pub fn create_work(&self, artifact: Arc<Artifact>) -> Vec<WorkUnit> {
        let instructions = (*artifact.instructions).clone();
        let parts = instructions.map(|i| i.parts).unwrap_or_default();

        if parts.is_empty() {
            return vec![WorkUnit {
                description: format!("POST {}", artifact.relative_path),
                kind: WorkUnitKind::Whole,
                artifact,
            }];
        }

        parts
            .into_iter()
            .map(|part| WorkUnit {
                description: format!("PUT part {} of {}", part.index, artifact.relative_path),
                kind: WorkUnitKind::Part(part),
                artifact: artifact.clone(),
            })
            .collect()
    }

    pub async fn execute(
        &self,
        client: &Client,
        unit: &WorkUnit,
        _cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        match &unit.kind {
            WorkUnitKind::Part(part) => self.upload_part(client, unit, part).await,
            WorkUnitKind::Whole => self.upload_whole(client, unit).await,
        }
    }

    async fn upload_part(
        &self,
        client: &Client,
        unit: &WorkUnit,
        part: &crate::artifact::MultipartPart,
    ) -> Result<(), TransferError> {
        let artifact = &unit.artifact;
        let instructions = (*artifact.instructions).clone().unwrap_or_default();
        let (start, end) = part_range(artifact.size, part.index, instructions.parts.len() as u32);

        let mut file = tokio::fs::File::open(&artifact.absolute_path).await?;
        tokio::io::AsyncSeekExt::seek(&mut file, std::io::SeekFrom::Start(start)).await?;
        let mut buffer = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buffer).await?;

        let mut request = client.request(
            part.method.parse().unwrap_or(reqwest::Method::PUT),
            &part.url,
        );
        for (name, value) in &part.headers {
            request = request.header(name, value);
        }

        let response = request.body(buffer).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn upload_whole(&self, client: &Client, unit: &WorkUnit) -> Result<(), TransferError> {
        let artifact = &unit.artifact;
        let instructions = (*artifact.instructions)
            .clone()
            .ok_or_else(|| ConfigurationError::UnknownScheme {
                destination: "missing upload instructions".to_string(),
            })?;

        let method = instructions
            .method
            .as_deref()
            .unwrap_or("POST")
            .parse()
            .unwrap_or(reqwest::Method::POST);
        let action = instructions.action.clone().unwrap_or_default();

        let mut form = reqwest::multipart::Form::new();
        for (key, raw_value) in &instructions.data {
            let value = substitute_placeholders(raw_value, artifact);
            form = form.text(key.clone(), value);
        }

        let file_bytes = tokio::fs::read(&artifact.absolute_path).await?;
        let part = reqwest::multipart::Part::bytes(file_bytes)
            .file_name(file_name(&artifact.relative_path))
            .mime_str(&artifact.content_type)
            .unwrap_or_else(|_| reqwest::multipart::Part::bytes(Vec::new()));
        form = form.part("file", part);

        let mut request = client.request(method, &action);
        for (name, value) in &instructions.headers {
            request = request.header(name, value);
        }

        let response = request.multipart(form).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

fn file_name(relative_path: &str) -> String {
    relative_path
        .rsplit('/')
        .next()
        .unwrap_or(relative_path)
        .to_string()
}

/// Substitutes `${artifact:path|filename|content-type}` placeholders in a
/// server-supplied form field value (spec §4.3.1).
fn substitute_placeholders(template: &str, artifact: &Artifact) -> String {
    template
        .replace("${artifact:path}", &artifact.relative_path)
        .replace("${artifact:filename}", &file_name(&artifact.relative_path))
        .replace("${artifact:content-type}", &artifact.content_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::UploadInstructions;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn sample_artifact() -> Artifact {
        Artifact::new(
            "logs/out.txt".to_string(),
            PathBuf::from("/tmp/out.txt"),
            4,
            "sha1".to_string(),
            "sha256".to_string(),
            "text/plain".to_string(),
            String::new(),
        )
    }

    #[test]
    fn placeholder_substitution_fills_path_filename_and_type() {
        let artifact = sample_artifact();
        let template = "key=${artifact:path} name=${artifact:filename} type=${artifact:content-type}";
        let rendered = substitute_placeholders(template, &artifact);
        assert_eq!(rendered, "key=logs/out.txt name=out.txt type=text/plain");
    }

    #[tokio::test]
    async fn no_parts_yields_a_single_whole_work_unit() {
        let artifact = Arc::new(sample_artifact());
        let adapter = DefaultFormAdapter::new();
        let units = adapter.create_work(artifact);
        assert_eq!(units.len(), 1);
        assert!(matches!(units[0].kind, WorkUnitKind::Whole));
    }

    #[tokio::test]
    async fn parts_yield_one_work_unit_each() {
        let artifact = Arc::new(sample_artifact());
        let mut instructions = UploadInstructions::default();
        instructions.parts = vec![
            crate::artifact::MultipartPart {
                index: 0,
                method: "PUT".to_string(),
                url: "https://example.com/p0".to_string(),
                headers: HashMap::new(),
            },
            crate::artifact::MultipartPart {
                index: 1,
                method: "PUT".to_string(),
                url: "https://example.com/p1".to_string(),
                headers: HashMap::new(),
            },
        ];
        artifact.instructions.set(Some(instructions)).await;

        let adapter = DefaultFormAdapter::new();
        let units = adapter.create_work(artifact);
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| matches!(u.kind, WorkUnitKind::Part(_))));
    }
}
