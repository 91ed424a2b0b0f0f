//! Validation of compatibility-test inputs into a single data source.

use std::fmt;

use anyhow::Result;

use crate::error::TestError;

/// Which input supplies the raw or prepared data for a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// A dataset that is already prepared, referenced by uid.
    Prepared,
    /// Raw data and labels on the local disk.
    RawPath,
    /// A demo dataset tarball given by url.
    Demo,
    /// The benchmark's own demo dataset.
    Benchmark,
}

impl DataSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepared => "prepared",
            Self::RawPath => "path",
            Self::Demo => "demo",
            Self::Benchmark => "benchmark",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-supplied test inputs. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestParams {
    pub benchmark: Option<u64>,
    pub data_prep: Option<String>,
    pub model: Option<String>,
    pub evaluator: Option<String>,
    pub data_path: Option<String>,
    pub labels_path: Option<String>,
    pub demo_url: Option<String>,
    pub demo_hash: Option<String>,
    pub data_uid: Option<String>,
}

fn given(value: Option<&String>) -> bool {
    value.is_some_and(|value| !value.trim().is_empty())
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    TestError::invalid_argument(message).into()
}

fn redundant_data_source() -> anyhow::Error {
    invalid(
        "Make sure you pass only one data source: either a prepared dataset, a data path and \
         labels path, or a demo dataset url",
    )
}

impl TestParams {
    /// Validate the combination and return the data source it selects.
    ///
    /// # Errors
    /// Returns [`TestError::InvalidArgument`] naming the first problem found.
    pub fn validate(&self) -> Result<DataSource> {
        self.validate_cubes()?;
        let source = self.validate_data_source()?;
        self.validate_redundant_benchmark(source)?;
        Ok(source)
    }

    fn validate_cubes(&self) -> Result<()> {
        let benchmark = self.benchmark.is_some();
        if !given(self.model.as_ref()) && !benchmark {
            return Err(invalid("A model mlcube or a benchmark should at least be specified"));
        }
        if !given(self.evaluator.as_ref()) && !benchmark {
            return Err(invalid(
                "A metrics mlcube or a benchmark should at least be specified",
            ));
        }
        Ok(())
    }

    fn validate_data_source(&self) -> Result<DataSource> {
        let data_path = given(self.data_path.as_ref());
        let labels_path = given(self.labels_path.as_ref());
        let demo_url = given(self.demo_url.as_ref());
        let demo_hash = given(self.demo_hash.as_ref());
        let data_uid = given(self.data_uid.as_ref());
        let data_prep = given(self.data_prep.as_ref()) || self.benchmark.is_some();

        if data_uid {
            if data_path || labels_path || demo_url || demo_hash {
                return Err(redundant_data_source());
            }
            if given(self.data_prep.as_ref()) {
                return Err(invalid(
                    "A data preparation cube is not needed when specifying a prepared dataset",
                ));
            }
            return Ok(DataSource::Prepared);
        }

        if data_path {
            if !labels_path {
                return Err(invalid(
                    "Labels path should be specified when providing data path",
                ));
            }
            if demo_url || demo_hash {
                return Err(redundant_data_source());
            }
            if !data_prep {
                return Err(invalid(
                    "A data preparation cube should be passed when specifying raw data input",
                ));
            }
            return Ok(DataSource::RawPath);
        }

        if demo_url {
            if labels_path {
                return Err(redundant_data_source());
            }
            if !data_prep {
                return Err(invalid(
                    "A data preparation cube should be passed when specifying raw data input",
                ));
            }
            return Ok(DataSource::Demo);
        }

        if labels_path {
            return Err(invalid(
                "Data path should be specified when providing labels path",
            ));
        }
        if demo_hash {
            return Err(invalid(
                "A demo dataset url should be specified when providing its hash",
            ));
        }
        if self.benchmark.is_none() {
            return Err(invalid(
                "A data source should at least be specified, either by providing a prepared \
                 data uid, a demo dataset url, data path, or a benchmark",
            ));
        }
        Ok(DataSource::Benchmark)
    }

    fn validate_redundant_benchmark(&self, source: DataSource) -> Result<()> {
        if self.benchmark.is_none() || source == DataSource::Benchmark {
            return Ok(());
        }
        let overrides_prep =
            source == DataSource::Prepared || given(self.data_prep.as_ref());
        if given(self.model.as_ref()) && given(self.evaluator.as_ref()) && overrides_prep {
            return Err(invalid("The provided benchmark will not be used"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, FailureKind};

    fn s(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    fn cubes() -> TestParams {
        TestParams {
            data_prep: s("1"),
            model: s("2"),
            evaluator: s("3"),
            ..TestParams::default()
        }
    }

    fn prepared() -> TestParams {
        TestParams {
            data_uid: s("abc"),
            data_prep: None,
            ..cubes()
        }
    }

    fn raw_path() -> TestParams {
        TestParams {
            data_path: s("/data"),
            labels_path: s("/labels"),
            ..cubes()
        }
    }

    fn demo() -> TestParams {
        TestParams {
            demo_url: s("https://example.org/demo.tar.gz"),
            demo_hash: s("ff"),
            ..cubes()
        }
    }

    fn benchmark_only() -> TestParams {
        TestParams {
            benchmark: Some(1),
            ..TestParams::default()
        }
    }

    fn rejected(params: &TestParams) -> String {
        let err = params.validate().expect_err("combination should be rejected");
        assert_eq!(error_kind(&err), FailureKind::InvalidArgument);
        err.to_string()
    }

    #[test]
    fn each_single_branch_is_accepted() -> Result<()> {
        assert_eq!(prepared().validate()?, DataSource::Prepared);
        assert_eq!(raw_path().validate()?, DataSource::RawPath);
        assert_eq!(demo().validate()?, DataSource::Demo);
        assert_eq!(benchmark_only().validate()?, DataSource::Benchmark);
        Ok(())
    }

    #[test]
    fn any_two_branches_are_rejected() {
        let prepared_and_path = TestParams {
            data_path: s("/data"),
            labels_path: s("/labels"),
            ..prepared()
        };
        let prepared_and_demo = TestParams {
            demo_url: s("https://example.org/demo.tar.gz"),
            ..prepared()
        };
        let path_and_demo = TestParams {
            demo_url: s("https://example.org/demo.tar.gz"),
            ..raw_path()
        };
        let demo_and_labels = TestParams {
            labels_path: s("/labels"),
            ..demo()
        };
        for params in [
            &prepared_and_path,
            &prepared_and_demo,
            &path_and_demo,
            &demo_and_labels,
        ] {
            assert!(rejected(params).contains("only one data source"));
        }
    }

    #[test]
    fn benchmark_fully_overridden_is_unused() {
        for params in [prepared(), raw_path(), demo()] {
            let params = TestParams {
                benchmark: Some(1),
                ..params
            };
            assert_eq!(rejected(&params), "The provided benchmark will not be used");
        }
    }

    #[test]
    fn benchmark_fills_partial_overrides() -> Result<()> {
        let params = TestParams {
            benchmark: Some(1),
            model: s("9"),
            ..TestParams::default()
        };
        assert_eq!(params.validate()?, DataSource::Benchmark);

        let params = TestParams {
            benchmark: Some(1),
            data_path: s("/data"),
            labels_path: s("/labels"),
            model: s("9"),
            ..TestParams::default()
        };
        assert_eq!(params.validate()?, DataSource::RawPath);

        let params = TestParams {
            benchmark: Some(1),
            data_uid: s("abc"),
            evaluator: s("7"),
            ..TestParams::default()
        };
        assert_eq!(params.validate()?, DataSource::Prepared);
        Ok(())
    }

    #[test]
    fn incomplete_inputs_are_rejected() {
        let no_model = TestParams {
            model: None,
            ..demo()
        };
        assert!(rejected(&no_model).contains("model mlcube"));

        let no_evaluator = TestParams {
            evaluator: s("   "),
            ..demo()
        };
        assert!(rejected(&no_evaluator).contains("metrics mlcube"));

        let no_labels = TestParams {
            labels_path: None,
            ..raw_path()
        };
        assert!(rejected(&no_labels).contains("Labels path"));

        let no_prep = TestParams {
            data_prep: None,
            ..demo()
        };
        assert!(rejected(&no_prep).contains("data preparation cube should be passed"));

        let prep_with_prepared = TestParams {
            data_prep: s("1"),
            ..prepared()
        };
        assert!(rejected(&prep_with_prepared).contains("not needed"));

        let nothing = TestParams {
            data_prep: None,
            ..cubes()
        };
        assert!(rejected(&nothing).contains("data source should at least be specified"));
    }

    #[test]
    fn orphaned_companion_fields_are_rejected() {
        let labels_only = TestParams {
            labels_path: s("/labels"),
            ..benchmark_only()
        };
        assert!(rejected(&labels_only).contains("Data path should be specified"));

        let hash_only = TestParams {
            demo_hash: s("ff"),
            ..benchmark_only()
        };
        assert!(rejected(&hash_only).contains("demo dataset url"));
    }

    #[test]
    fn empty_strings_count_as_absent() -> Result<()> {
        let params = TestParams {
            data_uid: s(""),
            data_path: s(""),
            demo_url: s(""),
            ..benchmark_only()
        };
        assert_eq!(params.validate()?, DataSource::Benchmark);
        Ok(())
    }
}
