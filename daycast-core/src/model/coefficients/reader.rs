use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::model::coefficients::{Coefficient, CoefficientError, CoefficientRole, CoefficientSet};

/// abstract source of a model's coefficient table. parameter-index identity
/// must match the model's internal numbering exactly; the engine never
/// renumbers.
pub trait CoefficientReader {
    fn read(&self, path: &Path) -> Result<CoefficientSet, CoefficientError>;
}

/// reader for the estimation-package text format:
///
/// ```text
/// <title line(s)>
/// END
/// <parameter> <label> <constraint> <value>
/// ...
/// -1
/// ```
///
/// roles are inferred from labels: `Gamm*` marks a size variable, `LSM_*`
/// the size-function multiplier, `Nest*` a nest dispersion parameter. the
/// first fixed size variable with a zero starting value becomes the base
/// size variable. constraints `T` and `C` (any case) mark a fixed parameter.
pub struct TextCoefficientReader;

impl CoefficientReader for TextCoefficientReader {
    fn read(&self, path: &Path) -> Result<CoefficientSet, CoefficientError> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(CoefficientError::FileNotFound(display));
        }

        let file = File::open(path).map_err(|source| CoefficientError::Io {
            path: display.clone(),
            source,
        })?;
        let reader = BufReader::new(file);

        let mut title = String::new();
        let mut in_header = true;
        let mut base_size_found = false;
        let mut size_function_multiplier: Option<Coefficient> = None;
        let mut coefficients: Vec<Coefficient> = Vec::new();

        for (line_index, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| CoefficientError::Io {
                path: display.clone(),
                source,
            })?;
            let line_number = line_index + 1;
            let trimmed = line.trim();

            if in_header {
                if trimmed == "END" {
                    in_header = false;
                } else if title.is_empty() && !trimmed.is_empty() {
                    title = trimmed.to_string();
                }
                continue;
            }

            if trimmed == "-1" {
                break;
            }

            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            if tokens.len() < 4 {
                return Err(CoefficientError::Parse {
                    line: line_number,
                    message: format!("expected 4 fields, found {}", tokens.len()),
                });
            }

            let parameter: usize = tokens[0].parse().map_err(|_| CoefficientError::Parse {
                line: line_number,
                message: format!("invalid parameter index '{}'", tokens[0]),
            })?;
            let label = tokens[1].to_string();
            let constraint = tokens[2];
            let value: f64 = tokens[3].parse().map_err(|_| CoefficientError::Parse {
                line: line_number,
                message: format!("invalid starting value '{}'", tokens[3]),
            })?;

            let fixed = constraint.eq_ignore_ascii_case("t") || constraint.eq_ignore_ascii_case("c");

            let mut role = if label.starts_with("Gamm") {
                CoefficientRole::Size
            } else if label.starts_with("LSM_") {
                CoefficientRole::SizeFunctionMultiplier
            } else if label.starts_with("Nest") {
                CoefficientRole::NestDispersion
            } else {
                CoefficientRole::Generic
            };

            if !base_size_found && role == CoefficientRole::Size && fixed && value.abs() < 1e-12 {
                base_size_found = true;
                role = CoefficientRole::BaseSize;
            }

            let coefficient = Coefficient::new(parameter, label, value, fixed, role);

            if role == CoefficientRole::SizeFunctionMultiplier {
                size_function_multiplier = Some(coefficient.clone());
            }

            coefficients.push(coefficient);
        }

        if coefficients.is_empty() {
            return Err(CoefficientError::Empty(display));
        }

        let max_parameter = coefficients.iter().map(|c| c.parameter).max().unwrap_or(0);
        let mut table: Vec<Option<Coefficient>> = vec![None; max_parameter + 1];
        for coefficient in coefficients {
            let parameter = coefficient.parameter;
            table[parameter] = Some(coefficient);
        }

        Ok(CoefficientSet::new(title, table, size_function_multiplier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    const SAMPLE: &str = "\
Work Location Model
END
  1 AdjFactor    C  1.0000
  2 LogSum       F  0.5000
 51 GammaSvc     T  0.0000
 52 GammaEdu     F  0.2000
 90 LSM_Work     F  0.7000
 98 NestTheta    F  0.6000
-1
";

    #[test]
    fn test_reads_title_and_parameters() {
        let file = write_temp(SAMPLE);
        let set = TextCoefficientReader.read(file.path()).expect("read");

        assert_eq!(set.title(), "Work Location Model");
        assert_eq!(set.len(), 99);
        assert_eq!(set.get(1).unwrap().value, 1.0);
        assert!(set.get(1).unwrap().fixed);
        assert!(!set.get(2).unwrap().fixed);
        assert!(set.get(3).is_none());
    }

    #[test]
    fn test_role_detection() {
        let file = write_temp(SAMPLE);
        let set = TextCoefficientReader.read(file.path()).expect("read");

        assert_eq!(set.get(2).unwrap().role, CoefficientRole::Generic);
        // first fixed zero-valued Gamm row becomes the base size variable
        assert_eq!(set.get(51).unwrap().role, CoefficientRole::BaseSize);
        assert_eq!(set.get(52).unwrap().role, CoefficientRole::Size);
        assert_eq!(set.get(90).unwrap().role, CoefficientRole::SizeFunctionMultiplier);
        assert_eq!(set.get(98).unwrap().role, CoefficientRole::NestDispersion);

        let lsm = set.size_function_multiplier().expect("multiplier");
        assert_eq!(lsm.parameter, 90);
        assert_eq!(set.size_multiplier_value(), 0.7);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let result = TextCoefficientReader.read(Path::new("/nonexistent/coeffs.f12"));
        assert!(matches!(result, Err(CoefficientError::FileNotFound(_))));
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let file = write_temp("title\nEND\n  1 OnlyTwo\n-1\n");
        match TextCoefficientReader.read(file.path()) {
            Err(CoefficientError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_table_is_fatal() {
        let file = write_temp("title\nEND\n-1\n");
        assert!(matches!(
            TextCoefficientReader.read(file.path()),
            Err(CoefficientError::Empty(_))
        ));
    }
}
