use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Read;
use vpsc::{Axis, GenerateOptions, Mode, Problem, RecordingSink, Rectangle, Solver, VarId};

#[derive(Debug)]
enum CliError {
    Usage(&'static str),
    Io(std::io::Error),
    Json(serde_json::Error),
    Input(String),
    Solve(vpsc::Error),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Io(err) => write!(f, "I/O error: {err}"),
            CliError::Json(err) => write!(f, "JSON error: {err}"),
            CliError::Input(msg) => write!(f, "invalid input: {msg}"),
            CliError::Solve(err) => write!(f, "{err}"),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<vpsc::Error> for CliError {
    fn from(value: vpsc::Error) -> Self {
        Self::Solve(value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
enum Command {
    #[default]
    Solve,
    Rects,
}

#[derive(Debug, Default)]
struct Args {
    command: Command,
    input: Option<String>,
    mode: Option<Mode>,
    axis: Option<Axis>,
    transitive_reduction: bool,
    pretty: bool,
    out: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VariableIn {
    id: usize,
    desired: f64,
    #[serde(default = "default_weight")]
    weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct ConstraintIn {
    left: usize,
    right: usize,
    gap: f64,
    #[serde(default)]
    equality: bool,
}

#[derive(Debug, Deserialize)]
struct SolveIn {
    #[serde(default)]
    mode: Option<Mode>,
    variables: Vec<VariableIn>,
    #[serde(default)]
    constraints: Vec<ConstraintIn>,
}

#[derive(Debug, Deserialize)]
struct RectsIn {
    #[serde(default)]
    mode: Option<Mode>,
    #[serde(default)]
    axis: Option<Axis>,
    #[serde(default)]
    transitive_reduction: bool,
    rectangles: Vec<Rectangle>,
}

#[derive(Serialize)]
struct SolveOut {
    mode: Mode,
    cost: f64,
    /// Solved position per caller id, in input order.
    positions: IndexMap<usize, f64>,
}

#[derive(Serialize)]
struct RectsOut {
    mode: Mode,
    axis: Axis,
    constraints: usize,
    cost: f64,
    rectangles: Vec<Rectangle>,
}

fn usage() -> &'static str {
    "vpsc-cli\n\
\n\
USAGE:\n\
  vpsc-cli [solve] [--mode batch|incremental] [--pretty] [--out <path>] [<path>|-]\n\
  vpsc-cli rects [--axis x|y] [--transitive-reduction] [--mode batch|incremental] [--pretty] [--out <path>] [<path>|-]\n\
\n\
NOTES:\n\
  - If <path> is omitted or '-', input is read from stdin.\n\
  - solve reads {\"variables\": [{\"id\", \"desired\", \"weight\"?}], \"constraints\": [{\"left\", \"right\", \"gap\", \"equality\"?}]}\n\
    where left/right are variable ids, and prints the solved position per id.\n\
  - rects reads {\"rectangles\": [{\"min_x\", \"max_x\", \"min_y\", \"max_y\"}], \"axis\"?} and prints the\n\
    rectangles moved along the axis so that none overlap.\n\
  - Command-line flags override the corresponding input fields.\n\
  - Set VPSC_TRACE=1 to dump solver events to stderr.\n\
"
}

fn parse_mode(s: &str) -> Result<Mode, CliError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "batch" => Ok(Mode::Batch),
        "incremental" => Ok(Mode::Incremental),
        _ => Err(CliError::Usage(usage())),
    }
}

fn parse_axis(s: &str) -> Result<Axis, CliError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "x" => Ok(Axis::X),
        "y" => Ok(Axis::Y),
        _ => Err(CliError::Usage(usage())),
    }
}

fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut args = Args::default();

    let mut it = argv.iter().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--help" | "-h" => return Err(CliError::Usage(usage())),
            "solve" => args.command = Command::Solve,
            "rects" => args.command = Command::Rects,
            "--pretty" => args.pretty = true,
            "--transitive-reduction" => args.transitive_reduction = true,
            "--mode" => {
                let Some(mode) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.mode = Some(parse_mode(mode)?);
            }
            "--axis" => {
                let Some(axis) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.axis = Some(parse_axis(axis)?);
            }
            "--out" => {
                let Some(out) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.out = Some(out.clone());
            }
            other if other.starts_with('-') && other != "-" => {
                return Err(CliError::Usage(usage()));
            }
            path => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some(path.to_string());
            }
        }
    }

    Ok(args)
}

fn read_input(input: Option<&str>) -> Result<String, CliError> {
    match input {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
    }
}

fn write_json(value: &impl Serialize, pretty: bool, out: Option<&str>) -> Result<(), CliError> {
    let mut text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    text.push('\n');
    match out {
        None => print!("{text}"),
        Some(path) => std::fs::write(path, text)?,
    }
    Ok(())
}

/// Builds the problem, mapping caller ids to handles in input order.
fn build_problem(input: &SolveIn) -> Result<(Problem, IndexMap<usize, VarId>), CliError> {
    let mut problem = Problem::new();
    let mut ids: IndexMap<usize, VarId> = IndexMap::with_capacity(input.variables.len());
    for v in &input.variables {
        if !(v.weight.is_finite() && v.weight > 0.0) {
            return Err(CliError::Input(format!(
                "variable {} has non-positive weight {}",
                v.id, v.weight
            )));
        }
        if !v.desired.is_finite() {
            return Err(CliError::Input(format!(
                "variable {} has a non-finite desired position",
                v.id
            )));
        }
        if ids.contains_key(&v.id) {
            return Err(CliError::Input(format!("duplicate variable id {}", v.id)));
        }
        ids.insert(v.id, problem.add_variable(v.id, v.desired, v.weight));
    }

    for (ix, c) in input.constraints.iter().enumerate() {
        let lookup = |id: usize| {
            ids.get(&id).copied().ok_or_else(|| {
                CliError::Input(format!("constraint {ix} references unknown variable {id}"))
            })
        };
        let (left, right) = (lookup(c.left)?, lookup(c.right)?);
        if !c.gap.is_finite() {
            return Err(CliError::Input(format!("constraint {ix} has a non-finite gap")));
        }
        if c.equality {
            problem.add_equality(left, right, c.gap);
        } else {
            problem.add_constraint(left, right, c.gap);
        }
    }

    if problem.constraint_graph_is_cyclic() {
        return Err(CliError::Input("constraints form a cycle".to_string()));
    }
    Ok((problem, ids))
}

fn solve(problem: &mut Problem, mode: Mode) -> Result<(), CliError> {
    let trace_enabled = std::env::var("VPSC_TRACE").ok().as_deref() == Some("1");
    if !trace_enabled {
        vpsc::solve(problem, mode)?;
        return Ok(());
    }

    let mut sink = RecordingSink::new();
    let start = std::time::Instant::now();
    let result = Solver::new(problem, mode).with_trace(&mut sink).solve();
    let elapsed = start.elapsed();
    for event in &sink.events {
        eprintln!("[vpsc] {event:?}");
    }
    eprintln!(
        "[vpsc] mode={mode:?} events={} merges={} splits={} elapsed={elapsed:?}",
        sink.events.len(),
        sink.count_merges(),
        sink.count_splits(),
    );
    result?;
    Ok(())
}

fn run(args: Args) -> Result<(), CliError> {
    let text = read_input(args.input.as_deref())?;
    match args.command {
        Command::Solve => {
            let input: SolveIn = serde_json::from_str(&text)?;
            let mode = args.mode.or(input.mode).unwrap_or_default();
            let (mut problem, ids) = build_problem(&input)?;
            solve(&mut problem, mode)?;

            let positions = ids
                .iter()
                .map(|(id, v)| (*id, problem.position(*v)))
                .collect();
            let out = SolveOut {
                mode,
                cost: problem.cost(),
                positions,
            };
            write_json(&out, args.pretty, args.out.as_deref())
        }
        Command::Rects => {
            let input: RectsIn = serde_json::from_str(&text)?;
            let mode = args.mode.or(input.mode).unwrap_or_default();
            let axis = args.axis.or(input.axis).unwrap_or_default();
            let options = GenerateOptions {
                transitive_reduction: args.transitive_reduction || input.transitive_reduction,
            };
            if let Some(ix) = input
                .rectangles
                .iter()
                .position(|r| !(r.min_x <= r.max_x && r.min_y <= r.max_y))
            {
                return Err(CliError::Input(format!("rectangle {ix} has inverted bounds")));
            }

            let mut problem = Problem::from_rectangles(&input.rectangles, axis, &options);
            solve(&mut problem, mode)?;

            let rectangles = input
                .rectangles
                .iter()
                .zip(problem.positions())
                .map(|(r, p)| r.moved_to(axis, p))
                .collect();
            let out = RectsOut {
                mode,
                axis,
                constraints: problem.num_constraints(),
                cost: problem.cost(),
                rectangles,
            };
            write_json(&out, args.pretty, args.out.as_deref())
        }
    }
}

fn main() {
    let args = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(v) => v,
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(args) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
