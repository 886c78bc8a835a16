use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use parking_lot::Mutex;
use petgraph::{algo::tarjan_scc, graphmap::DiGraphMap};
use wdinstr::{
    modules::{Function, Unit, operand::Name, symbol::SymbolTable},
    utils::Error as IrError,
};

use crate::{
    cfg::{AnalyzedFunction, analyze_function},
    diagnostics::Diagnostic,
    suspend::{LoweredFunction, lower_function},
    utils::{
        conf::AnalysisConfig,
        error::{CoreError, CoreResult},
    },
};

/// A function that passed every check.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    /// Position of the function in its unit.
    pub index: usize,
    /// The function with every expression annotated with its type.
    pub function: Function,
    pub analysis: AnalyzedFunction,
    /// State machine of a suspendible function.
    pub lowered: Option<LoweredFunction>,
}

impl CompiledFunction {
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// Ordered by declaration index, then location.
    pub diagnostics: Vec<Diagnostic>,
    /// Ordered by declaration index.
    pub functions: Vec<CompiledFunction>,
}

impl CompileOutput {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| f.name() == name)
    }

    pub fn diagnostics_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.function == name)
    }
}

impl std::fmt::Display for CompileOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for d in &self.diagnostics {
            writeln!(f, "{}", d)?;
        }
        for compiled in &self.functions {
            match &compiled.lowered {
                Some(lowered) => writeln!(f, "{}", lowered)?,
                None => writeln!(f, "{}", compiled.analysis)?,
            }
        }
        Ok(())
    }
}

type Job = (usize, Function);
type JobResult = (usize, CoreResult<CompiledFunction>);

/// Drives the analysis of a whole unit.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: AnalysisConfig,
}

impl Compiler {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Compiler configured from the file at [`AnalysisConfig::default_path`],
    /// or with the defaults when there is none.
    pub fn from_default_config() -> CoreResult<Self> {
        let config = AnalysisConfig::load()?;
        debug!("analysis configuration: {:?}", config);
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Checks every function of `unit`. A failing function never stops the
    /// analysis of the others; the output only depends on the unit and the
    /// configuration.
    pub fn compile(&self, unit: &Unit) -> CompileOutput {
        let mut output = CompileOutput::default();
        let symbols = match SymbolTable::from_unit(unit) {
            Ok(symbols) => symbols,
            Err(e) => {
                output
                    .diagnostics
                    .push(Diagnostic::from_error("", 0, &CoreError::from(e)));
                return output;
            }
        };

        let mut rejected = BTreeSet::new();
        let mut jobs: Vec<Job> = Vec::with_capacity(unit.functions.len());
        for (index, function) in unit.functions.iter().enumerate() {
            let mut annotated = function.clone();
            if let Err(e) = annotated.annotate() {
                output
                    .diagnostics
                    .push(Diagnostic::from_error(&function.name, index, &CoreError::from(e)));
                rejected.insert(index);
                continue;
            }
            jobs.push((index, annotated));
        }

        for (index, error) in call_graph_errors(unit, &symbols) {
            if rejected.insert(index) {
                let name = &unit.functions[index].name;
                output.diagnostics.push(Diagnostic::from_error(name, index, &error));
            }
        }
        jobs.retain(|(index, _)| !rejected.contains(index));

        let results = if self.config.parallel && jobs.len() > 1 {
            self.run_parallel(jobs, &symbols)
        } else {
            jobs.into_iter()
                .map(|(index, f)| (index, compile_function(index, f, &symbols, &self.config)))
                .collect()
        };

        for (index, result) in results {
            match result {
                Ok(compiled) => output.functions.push(compiled),
                Err(e) => {
                    let name = &unit.functions[index].name;
                    debug!("`{}` rejected: {}", name, e);
                    output.diagnostics.push(Diagnostic::from_error(name, index, &e));
                }
            }
        }

        output.functions.sort_by_key(|f| f.index);
        output.diagnostics.sort_by_key(Diagnostic::sort_key);
        set_continuation_depths(&mut output.functions);

        info!(
            "compiled {} of {} functions, {} diagnostics",
            output.functions.len(),
            unit.functions.len(),
            output.diagnostics.len()
        );
        output
    }

    fn run_parallel(&self, jobs: Vec<Job>, symbols: &SymbolTable) -> Vec<JobResult> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(jobs.len());
        let names: BTreeMap<usize, Name> = jobs.iter().map(|(i, f)| (*i, f.name.clone())).collect();
        let queue = Mutex::new(jobs.into_iter());
        let results: Mutex<Vec<JobResult>> = Mutex::new(Vec::new());

        let scoped = crossbeam::scope(|s| {
            for _ in 0..workers {
                s.spawn(|_| {
                    loop {
                        let Some((index, function)) = queue.lock().next() else {
                            break;
                        };
                        let result = compile_function(index, function, symbols, &self.config);
                        results.lock().push((index, result));
                    }
                });
            }
        });

        let mut results = results.into_inner();
        if scoped.is_err() {
            warn!("an analysis worker panicked");
            let done: BTreeSet<usize> = results.iter().map(|(i, _)| *i).collect();
            for (index, function) in names.into_iter().filter(|(i, _)| !done.contains(i)) {
                results.push((index, Err(CoreError::WorkerPanicked { function })));
            }
        }
        results.sort_by_key(|(i, _)| *i);
        results
    }
}

fn compile_function(
    index: usize,
    function: Function,
    symbols: &SymbolTable,
    config: &AnalysisConfig,
) -> CoreResult<CompiledFunction> {
    let analysis = analyze_function(&function, symbols, config)?;
    let lowered = if function.is_suspendible() {
        Some(lower_function(&function, &analysis, symbols, config)?)
    } else {
        None
    };
    Ok(CompiledFunction {
        index,
        function,
        analysis,
        lowered,
    })
}

/// Undefined callees and recursive cycles, one error per offending function.
fn call_graph_errors(unit: &Unit, symbols: &SymbolTable) -> Vec<(usize, CoreError)> {
    let mut errors = Vec::new();
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for (index, function) in unit.functions.iter().enumerate() {
        graph.add_node(index);
        for (callee, loc) in function.callees() {
            match symbols.get(callee) {
                Some(sig) => {
                    graph.add_edge(index, sig.index, ());
                }
                None => errors.push((
                    index,
                    CoreError::Ir(IrError::UndefinedFunction {
                        function: function.name.clone(),
                        callee: callee.clone(),
                        loc,
                    }),
                )),
            }
        }
    }

    for component in tarjan_scc(&graph) {
        let cyclic = component.len() > 1 || component.iter().any(|n| graph.contains_edge(*n, *n));
        if !cyclic {
            continue;
        }
        let mut members: Vec<usize> = component;
        members.sort();
        let names: Vec<&str> = members
            .iter()
            .map(|i| unit.functions[*i].name.as_str())
            .collect();
        for index in &members {
            let function = &unit.functions[*index];
            let loc = function
                .callees()
                .into_iter()
                .find(|(callee, _)| symbols.get(callee).is_some_and(|s| members.contains(&s.index)))
                .map(|(_, loc)| loc)
                .unwrap_or(function.loc);
            errors.push((
                *index,
                CoreError::UnsupportedConstruct {
                    function: function.name.clone(),
                    loc,
                    message: format!("recursive call cycle through {}", names.join(", ")),
                },
            ));
        }
    }
    errors.sort_by_key(|(i, e)| (*i, e.loc()));
    errors
}

/// Sets the nesting depth of every continuation layout. Cycles were
/// rejected, so the recursion terminates.
fn set_continuation_depths(functions: &mut [CompiledFunction]) {
    let nested: BTreeMap<Name, Vec<Name>> = functions
        .iter()
        .filter_map(|f| {
            let lowered = f.lowered.as_ref()?;
            Some((f.function.name.clone(), lowered.nested_callees().cloned().collect()))
        })
        .collect();

    fn depth(name: &str, nested: &BTreeMap<Name, Vec<Name>>, memo: &mut BTreeMap<Name, usize>) -> usize {
        if let Some(d) = memo.get(name) {
            return *d;
        }
        let d = 1 + nested
            .get(name)
            .map(|callees| callees.iter().map(|c| depth(c, nested, memo)).max().unwrap_or(0))
            .unwrap_or(0);
        memo.insert(name.to_string(), d);
        d
    }

    let mut memo = BTreeMap::new();
    for f in functions.iter_mut() {
        if let Some(lowered) = &mut f.lowered {
            lowered.layout.depth = depth(&f.function.name, &nested, &mut memo);
        }
    }
}

#[cfg(test)]
mod tests {
    use wdinstr::{
        modules::{
            builder::FunctionBuilder,
            operand::{lit, var},
        },
        types::Type,
    };

    use super::*;
    use crate::{magic::ENV_ANALYSIS_CONFIG_PATH, utils::error::ErrorKind};

    fn sequential() -> Compiler {
        Compiler::new(AnalysisConfig {
            parallel: false,
            ..AnalysisConfig::default()
        })
    }

    fn returns_one(name: &str) -> Function {
        FunctionBuilder::new(name)
            .returns(Type::u32())
            .body(|b| {
                b.ret_value(lit(1));
            })
            .build()
            .unwrap()
    }

    #[test]
    fn undefined_callee_is_reported() {
        let caller = FunctionBuilder::new("caller")
            .body(|b| {
                b.call("missing", vec![]);
            })
            .build_raw();
        let output = sequential().compile(&Unit::new([caller, returns_one("fine")]));
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].function, "caller");
        assert_eq!(output.diagnostics[0].kind, ErrorKind::UnsupportedConstruct);
        assert!(output.function("fine").is_some());
    }

    #[test]
    fn recursion_is_rejected() {
        let ping = FunctionBuilder::new("ping")
            .body(|b| {
                b.call("pong", vec![]);
            })
            .build_raw();
        let pong = FunctionBuilder::new("pong")
            .body(|b| {
                b.call("ping", vec![]);
            })
            .build_raw();
        let output = sequential().compile(&Unit::new([ping, pong]));
        let kinds: Vec<_> = output.diagnostics.iter().map(|d| (d.function.as_str(), d.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("ping", ErrorKind::UnsupportedConstruct),
                ("pong", ErrorKind::UnsupportedConstruct)
            ]
        );
        assert!(output.functions.is_empty());
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let functions: Vec<Function> = (0..6)
            .map(|i| {
                FunctionBuilder::new(format!("f{}", i))
                    .param("x", Type::u8())
                    .returns(Type::u32())
                    .body(|b| {
                        b.ret_value(var("x") + i);
                    })
                    .build()
                    .unwrap()
            })
            .collect();
        let unit = Unit::new(functions);
        let a = sequential().compile(&unit);
        let b = Compiler::default().compile(&unit);
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(b.functions.len(), 6);
        assert!(b.is_ok());
    }

    #[test]
    fn nested_suspendible_calls_deepen_the_layout() {
        let inner = FunctionBuilder::new("inner")
            .param("src", Type::Reader)
            .returns(Type::u8())
            .suspendible()
            .body(|b| {
                b.var("x", Type::u8());
                b.read("x", "src");
                b.ret_value(var("x"));
            })
            .build()
            .unwrap();
        let outer = FunctionBuilder::new("outer")
            .param("src", Type::Reader)
            .returns(Type::u8())
            .suspendible()
            .body(|b| {
                b.var("y", Type::u8());
                b.call_into("y", "inner", vec![var("src")]);
                b.ret_value(var("y"));
            })
            .build()
            .unwrap();
        let output = sequential().compile(&Unit::new([inner, outer]));
        assert!(output.is_ok(), "{}", output);
        let depth = |name: &str| output.function(name).unwrap().lowered.as_ref().unwrap().layout.depth;
        assert_eq!(depth("inner"), 1);
        assert_eq!(depth("outer"), 2);
    }

    #[test]
    fn configuration_file_is_picked_up_from_the_environment() {
        let dir = std::env::temp_dir().join(format!("warden-compiler-{}", std::process::id()));
        let path = dir.join("analysis.toml");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "parallel = false\nloop_iteration_cap = 3\n").unwrap();

        // No other test reads this variable.
        unsafe { std::env::set_var(ENV_ANALYSIS_CONFIG_PATH, &path) };
        let compiler = Compiler::from_default_config().unwrap();
        assert!(!compiler.config().parallel);
        assert_eq!(compiler.config().loop_iteration_cap, 3);
        assert_eq!(compiler.config().rule_budget, AnalysisConfig::default().rule_budget);
        assert!(compiler.compile(&Unit::new([returns_one("one")])).is_ok());

        unsafe { std::env::set_var(ENV_ANALYSIS_CONFIG_PATH, dir.join("missing.toml")) };
        let fallback = Compiler::from_default_config().unwrap();
        assert_eq!(fallback.config(), &AnalysisConfig::default());

        std::fs::write(&path, "loop_iteration_cap = \"often\"\n").unwrap();
        unsafe { std::env::set_var(ENV_ANALYSIS_CONFIG_PATH, &path) };
        assert!(Compiler::from_default_config().unwrap_err().is_config_parse_error());

        unsafe { std::env::remove_var(ENV_ANALYSIS_CONFIG_PATH) };
        let _ = std::fs::remove_dir_all(&dir);
    }
}
