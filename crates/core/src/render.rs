//! Canonical YAML encoding of the job list.

use crate::Job;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("serializing scrape jobs: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Sort by `job_name` (stable) and encode as a YAML sequence.
///
/// Output is byte-identical for logically identical input: struct fields encode in
/// declaration order and label maps are ordered.
pub fn render(mut jobs: Vec<Job>) -> Result<Vec<u8>, RenderError> {
    jobs.sort_by(|a, b| a.job_name.cmp(&b.job_name));
    Ok(serde_yaml::to_string(&jobs)?.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticConfig;

    fn job(name: &str, target: &str) -> Job {
        Job {
            job_name: name.into(),
            static_configs: vec![StaticConfig {
                targets: vec![target.into()],
                labels: [("zone".to_string(), "b".to_string()), ("job".to_string(), name.to_string())].into(),
            }],
        }
    }

    #[test]
    fn render_sorts_and_orders_fields() {
        let out = render(vec![job("test2", "http://test2"), job("test1", "http://test1")]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let expected = "\
- job_name: test1
  static_configs:
  - targets:
    - http://test1
    labels:
      job: test1
      zone: b
- job_name: test2
  static_configs:
  - targets:
    - http://test2
    labels:
      job: test2
      zone: b
";
        assert_eq!(text, expected);
    }

    #[test]
    fn render_is_permutation_stable() {
        let a = render(vec![job("a", "1"), job("b", "2"), job("c", "3")]).unwrap();
        let b = render(vec![job("c", "3"), job("a", "1"), job("b", "2")]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn render_empty_and_duplicates() {
        assert_eq!(render(Vec::new()).unwrap(), b"[]\n".to_vec());
        // duplicate names keep relative order
        let out = render(vec![job("dup", "first"), job("dup", "second")]).unwrap();
        let back: Vec<Job> = serde_yaml::from_slice(&out).unwrap();
        assert_eq!(back[0].static_configs[0].targets, vec!["first"]);
        assert_eq!(back[1].static_configs[0].targets, vec!["second"]);
    }
}
