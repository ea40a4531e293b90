use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::model::choice::ChoiceProbabilityCalculator;
use crate::model::coefficients::CoefficientRole;
use crate::model::estimation::EstimationError;
use crate::util::numeric::EPSILON;

/// append-only log of raw estimation rows. one row per accepted
/// observation, comma-delimited, compacted into the positional data file at
/// finalization.
pub struct EstimationLog {
    temp_path: PathBuf,
    writer: BufWriter<File>,
}

impl EstimationLog {
    /// opens the log at `<data_path>.tmp`, creating parent directories as
    /// needed.
    pub fn create(data_path: &Path) -> Result<EstimationLog, EstimationError> {
        let mut temp_path = data_path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        if let Some(parent) = temp_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = BufWriter::new(File::create(&temp_path)?);
        Ok(EstimationLog { temp_path, writer })
    }

    pub(crate) fn write_row(&mut self, row: &[f64]) -> Result<(), EstimationError> {
        for value in row {
            write!(self.writer, "{value},")?;
        }
        writeln!(self.writer)?;
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<PathBuf, EstimationError> {
        self.writer.flush()?;
        Ok(self.temp_path)
    }
}

/// rewrites the raw observation log as the positional data file the
/// external estimator reads: a 1-based row id followed by exactly
/// `total_cells` space-separated values, short rows padded with zeros.
pub(crate) fn compact_data_file(
    temp_path: &Path,
    data_path: &Path,
    total_cells: usize,
) -> Result<(), EstimationError> {
    let reader = BufReader::new(File::open(temp_path)?);
    let mut writer = BufWriter::new(File::create(data_path)?);

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = index + 1;
        let mut tokens = Vec::new();
        for token in line.split(',').filter(|t| !t.is_empty()) {
            let value: f64 = token.parse().map_err(|_| EstimationError::MalformedRow {
                line: line_number,
                message: format!("invalid value '{token}'"),
            })?;
            tokens.push(value);
        }

        write!(writer, "{line_number} ")?;
        for position in 0..total_cells {
            let value = tokens.get(position).copied().unwrap_or(0.0);
            write!(writer, "{value} ")?;
        }
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}

fn truncate(label: &str, width: usize) -> String {
    label.chars().take(width).collect()
}

/// writes the nine-section positional control file consumed by the external
/// nested-logit estimator. column ordering and layout must match that
/// parser exactly; do not reformat.
pub(crate) fn write_control_file(
    calculator: &ChoiceProbabilityCalculator,
    data_path: &Path,
    control_path: &Path,
) -> Result<(), EstimationError> {
    if let Some(parent) = control_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut w = BufWriter::new(File::create(control_path)?);

    write_title_section(calculator, &mut w)?;
    write_coefficient_section(calculator, &mut w)?;
    write_nest_section(calculator, &mut w)?;
    write_data_declaration_section(calculator, data_path, &mut w)?;
    write_choice_section(calculator, &mut w)?;
    write_summary_section(calculator, &mut w)?;
    write_availability_section(calculator, &mut w)?;
    write_utility_section(calculator, &mut w)?;
    write_size_section(calculator, &mut w)?;

    w.flush()?;
    Ok(())
}

/// section 1: title and solver directives.
fn write_title_section(
    calculator: &ChoiceProbabilityCalculator,
    w: &mut impl Write,
) -> Result<(), EstimationError> {
    writeln!(w, "$TITLE {}", calculator.coefficients.title())?;
    writeln!(w, "$ESTIMATE")?;
    writeln!(w, "$GEN.STATS utilities")?;
    writeln!(w, "$ALGOR maxit = 20")?;
    writeln!(w, "$ALGOR Zeta  = 0.15")?;
    writeln!(w)?;
    Ok(())
}

/// section 2: parameter labels, constraints and starting values.
fn write_coefficient_section(
    calculator: &ChoiceProbabilityCalculator,
    w: &mut impl Write,
) -> Result<(), EstimationError> {
    for coefficient in calculator.coefficients.iter() {
        writeln!(
            w,
            "{:>3}{:>11}{}{:>6.4}",
            coefficient.parameter,
            truncate(&coefficient.label(), 10),
            if coefficient.fixed { " T " } else { " F " },
            coefficient.value,
        )?;
    }
    writeln!(w)?;
    Ok(())
}

/// section 3: the nesting tree, `$NEST id (theta)` with child ids, at most
/// ten per physical line, continuation lines prefixed `+`.
fn write_nest_section(
    calculator: &ChoiceProbabilityCalculator,
    w: &mut impl Write,
) -> Result<(), EstimationError> {
    if calculator.levels.len() == 1 {
        return Ok(());
    }

    for level in 1..calculator.levels.len() {
        for nest in calculator.nests.iter().flatten() {
            if nest.level != level {
                continue;
            }
            write!(w, "$NEST {} ({})", nest.id, nest.theta_parameter)?;

            let children = if level == 1 {
                calculator
                    .alternatives
                    .iter()
                    .flatten()
                    .filter(|a| a.nest == Some(nest.index))
                    .map(|a| a.id())
                    .collect_vec()
            } else {
                calculator
                    .nests
                    .iter()
                    .flatten()
                    .filter(|n| n.parent == Some(nest.index))
                    .map(|n| n.id)
                    .collect_vec()
            };

            let mut children_on_line = 0;
            for child in children {
                children_on_line += 1;
                if children_on_line >= 10 {
                    writeln!(w)?;
                    write!(w, " +")?;
                    children_on_line = 0;
                }
                write!(w, " {child}")?;
            }
            writeln!(w)?;
        }
    }

    writeln!(w)?;
    Ok(())
}

/// section 4: the data-file declaration.
fn write_data_declaration_section(
    calculator: &ChoiceProbabilityCalculator,
    data_path: &Path,
    w: &mut impl Write,
) -> Result<(), EstimationError> {
    let data_file_name = data_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    writeln!(w, "$ARRAY DD({})", calculator.observation.len() + 1)?;
    writeln!(w, "FILE (name={data_file_name}) DD")?;
    writeln!(w, "ID = DD(1)")?;
    writeln!(w)?;
    Ok(())
}

/// section 5: the choice-column declaration.
fn write_choice_section(
    calculator: &ChoiceProbabilityCalculator,
    w: &mut impl Write,
) -> Result<(), EstimationError> {
    let chosen = calculator
        .observation
        .chosen
        .as_ref()
        .ok_or(EstimationError::MissingChosenColumn)?;
    writeln!(w, "choice = DD({})", chosen.position + 2)?;
    writeln!(w)?;
    Ok(())
}

/// section 6: descriptive summary, for checking against estimator output.
fn write_summary_section(
    calculator: &ChoiceProbabilityCalculator,
    w: &mut impl Write,
) -> Result<(), EstimationError> {
    writeln!(w, "- rejected observations: {}", calculator.rejected_observations)?;
    writeln!(w)?;

    writeln!(w, "- choice and availability summary -")?;
    writeln!(w)?;

    for alternative in calculator.alternatives.iter().flatten() {
        writeln!(
            w,
            "- alt {:>3} - {:>10} / Chosen {:>8} Available {:>8}",
            alternative.id(),
            truncate(&alternative.label(), 10),
            alternative.total_chosen,
            alternative.total_available,
        )?;
    }

    writeln!(w)?;
    writeln!(w, "- utility summary -")?;

    let accepted = calculator.accepted_observations.max(1) as f64;
    for alternative in calculator.alternatives.iter().flatten() {
        writeln!(w)?;
        for cell in alternative.utilities.iter().flatten() {
            let label = match calculator.coefficients.get(cell.parameter) {
                Some(coefficient) => coefficient.label(),
                None => format!("par_{}", cell.parameter),
            };
            writeln!(
                w,
                "- alt {:>3} - {:>10} / {:>3} - {:>10} % Non-0 {:>6.2} Mean {:>8.2}",
                alternative.id(),
                truncate(&alternative.label(), 10),
                cell.parameter,
                truncate(&label, 10),
                cell.total_nonzero as f64 * 100.0 / accepted,
                cell.total_value / (cell.total_nonzero as f64 + EPSILON),
            )?;
        }
    }

    writeln!(w)?;
    Ok(())
}

/// section 7: per-alternative availability expressions.
fn write_availability_section(
    calculator: &ChoiceProbabilityCalculator,
    w: &mut impl Write,
) -> Result<(), EstimationError> {
    for alternative in calculator.alternatives.iter().flatten() {
        if let Some(position) = alternative.position {
            writeln!(w, "avail({})=DD({})", alternative.id(), position + 2)?;
        }
    }
    writeln!(w)?;
    Ok(())
}

/// section 8: per-alternative utility equations.
fn write_utility_section(
    calculator: &ChoiceProbabilityCalculator,
    w: &mut impl Write,
) -> Result<(), EstimationError> {
    for alternative in calculator.alternatives.iter().flatten() {
        writeln!(w, "util({})=0", alternative.id())?;

        for cell in alternative.utilities.iter().flatten() {
            if cell.has_size_variable {
                continue;
            }
            writeln!(w, "{:>3} p{}*DD({})", "+", cell.parameter, cell.position + 2)?;
        }

        for &component_index in alternative.utility_components.iter() {
            let Some(component) = calculator
                .utility_components
                .get(component_index)
                .and_then(|slot| slot.as_ref())
            else {
                continue;
            };
            for cell in component.utilities.iter().flatten() {
                if cell.has_size_variable {
                    continue;
                }
                writeln!(w, "{:>3} p{}*DD({})", "+", cell.parameter, cell.position + 2)?;
            }
        }
        writeln!(w)?;
    }
    Ok(())
}

fn write_size_lines(
    calculator: &ChoiceProbabilityCalculator,
    cells: &[Option<crate::model::estimation::observation::UtilityCell>],
    w: &mut impl Write,
) -> Result<(), EstimationError> {
    for cell in cells.iter().flatten() {
        let Some(coefficient) = calculator.coefficients.get(cell.parameter) else {
            continue;
        };
        match coefficient.role {
            CoefficientRole::BaseSize => {
                writeln!(
                    w,
                    "{:>3} DD({}) + p{}*0",
                    "+",
                    cell.position + 2,
                    cell.parameter
                )?;
            }
            CoefficientRole::Size => {
                writeln!(w, "{:>3} p{}*DD({})", "+", cell.parameter, cell.position + 2)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// section 9: per-alternative size equations, emitted only when any size
/// variable exists anywhere in the model.
fn write_size_section(
    calculator: &ChoiceProbabilityCalculator,
    w: &mut impl Write,
) -> Result<(), EstimationError> {
    let any_size = calculator.alternatives.iter().flatten().any(|alternative| {
        alternative.uses_size_variables() || !alternative.size_components.is_empty()
    });
    if !any_size {
        return Ok(());
    }

    for alternative in calculator.alternatives.iter().flatten() {
        writeln!(w, "size({})=0", alternative.id())?;

        write_size_lines(calculator, &alternative.utilities, w)?;

        for &component_index in alternative.size_components.iter() {
            if let Some(component) = calculator
                .size_components
                .get(component_index)
                .and_then(|slot| slot.as_ref())
            {
                write_size_lines(calculator, &component.utilities, w)?;
            }
        }
        writeln!(w)?;
    }

    if let Some(multiplier) = calculator.coefficients.size_function_multiplier() {
        writeln!(w, "$L_S_M {}", multiplier.parameter)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_pads_short_rows_and_numbers_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let temp = dir.path().join("rows.tmp");
        let data = dir.path().join("rows.dat");

        std::fs::write(&temp, "1,0.5,\n1,\n").expect("write temp");
        compact_data_file(&temp, &data, 4).expect("compact");

        let contents = std::fs::read_to_string(&data).expect("read data");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].trim_end(), "1 1 0.5 0 0");
        assert_eq!(lines[1].trim_end(), "2 1 0 0 0");
    }

    #[test]
    fn test_compact_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let temp = dir.path().join("rows.tmp");
        let data = dir.path().join("rows.dat");

        std::fs::write(&temp, "1,abc,\n").expect("write temp");
        let result = compact_data_file(&temp, &data, 2);
        assert!(matches!(
            result,
            Err(EstimationError::MalformedRow { line: 1, .. })
        ));
    }

    #[test]
    fn test_truncate_limits_width() {
        assert_eq!(truncate("GammaService", 10), "GammaServi");
        assert_eq!(truncate("short", 10), "short");
    }
}
