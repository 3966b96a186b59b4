//! DSCript CLI - Tool for inspecting and converting chunk containers.

use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use dscript::core::Settings;
use dscript::model::{find_globals, MaterialResolver, ModelPackage, PackageVersion};
use dscript::spooler::{context, SpoolerFile, SpoolerId, SpoolerLoaded, SpoolerTree};
use dscript::convert::convert_version;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "warn",
            _ => filtered_args.push(arg),
        }
    }
    init_logging(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let result = match filtered_args[0] {
        "info" | "i" => with_args(&filtered_args, 1, "info <file>", |a| cmd_info(a[0])),
        "tree" | "t" => with_args(&filtered_args, 1, "tree <file>", |a| cmd_tree(a[0])),
        "models" | "m" => with_args(&filtered_args, 1, "models <file>", |a| cmd_models(a[0])),
        "copy" | "c" => with_args(&filtered_args, 2, "copy <in> <out>", |a| cmd_copy(a[0], a[1])),
        "export" | "e" => with_args(&filtered_args, 3, "export <in> <path> <out>", |a| cmd_export(a[0], a[1], a[2])),
        "convert" => with_args(&filtered_args, 3, "convert <in> <version> <out>", |a| cmd_convert(a[0], a[1], a[2])),
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        "version" | "--version" => {
            println!(
                "dscript-cli {} (built {} {})",
                env!("CARGO_PKG_VERSION"),
                env!("DSCRIPT_BUILD_DATE"),
                env!("DSCRIPT_BUILD_TIME")
            );
            Ok(())
        }
        // Default: if file exists, show info; otherwise error
        other => {
            if Path::new(other).exists() {
                cmd_info(other)
            } else {
                eprintln!("Unknown command: {other}");
                eprintln!();
                print_help();
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Run `f` with the `count` arguments after the command, or print usage.
fn with_args<F>(args: &[&str], count: usize, usage: &str, f: F) -> Result<()>
where
    F: FnOnce(&[&str]) -> Result<()>,
{
    if args.len() < count + 1 {
        eprintln!("Error: missing arguments");
        eprintln!("Usage: dscript-cli {usage}");
        std::process::exit(1);
    }
    f(&args[1..])
}

fn print_help() {
    println!("dscript-cli - DSCript chunk container toolkit");
    println!();
    println!("USAGE:");
    println!("    dscript-cli [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    i, info    <file>                  Show root header and node counts");
    println!("    t, tree    <file>                  Show the full node hierarchy");
    println!("    m, models  <file>                  Show model package statistics");
    println!("    c, copy    <in> <out>              Load and re-save (round-trip check)");
    println!("    e, export  <in> <path> <out>       Write the subtree at a child path (e.g. 0/2)");
    println!("    convert    <in> <version> <out>    Convert every model package (1, 6 or 9)");
    println!("    h, help                            Show this help");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Only show warnings and errors");
    println!();
    println!("NOTES:");
    println!("    - Passing a file directly is equivalent to 'info'");
    println!("    - RUST_LOG overrides the verbosity flags");
    println!("    - Settings are read from the dscript config directory");
}

fn open(path: &str) -> Result<SpoolerFile> {
    let settings = Settings::load();
    info!("Opening container: {path}");
    let file = SpoolerFile::open_with(path, &settings.spooler_options(), |e: &SpoolerLoaded| {
        tracing::trace!(depth = e.depth, context = e.context, size = e.size, "loaded node");
    })
    .with_context(|| format!("failed to open {path}"))?;
    Ok(file)
}

fn cmd_info(path: &str) -> Result<()> {
    let file = open(path)?;
    let root = file.require_root()?;
    let node = file.get(root)?;

    let mut packages = 0;
    let mut buffers = 0;
    let mut spilled = 0;
    for id in file.descendants(root)? {
        let n = file.get(id)?;
        if n.is_package() {
            packages += 1;
        } else {
            buffers += 1;
            if n.payload().is_some_and(|p| p.is_spilled()) {
                spilled += 1;
            }
        }
    }

    println!("Container: {path}");
    println!(
        "Root: context {:#010x}, version {}, alignment {} bytes, size {}",
        node.context(),
        node.version(),
        node.alignment_bytes(),
        file.size(root)?
    );
    if !node.description().is_empty() {
        println!("Description: {}", node.description());
    }
    println!();
    println!("Nodes:");
    println!("  Packages: {packages}");
    println!("  Buffers:  {buffers} ({spilled} spilled)");
    println!("  Model packages: {}", dscript::model::find_model_packages(&file).len());
    Ok(())
}

fn cmd_tree(path: &str) -> Result<()> {
    let file = open(path)?;
    println!("Container: {path}");
    println!();
    print_tree(&file, file.require_root()?, 0)
}

fn print_tree(tree: &SpoolerTree, id: SpoolerId, depth: usize) -> Result<()> {
    let node = tree.get(id)?;
    let indent = "  ".repeat(depth);
    let kind = if node.is_package() { "+" } else { "-" };
    let desc = if node.description().is_empty() {
        String::new()
    } else {
        format!(" \"{}\"", node.description())
    };
    println!(
        "{indent}{kind} {:#010x} v{} align {} size {}{desc}",
        node.context(),
        node.version(),
        node.alignment_bytes(),
        tree.size(id)?
    );
    for &child in tree.children(id)? {
        print_tree(tree, child, depth + 1)?;
    }
    Ok(())
}

fn load_packages(tree: &SpoolerTree) -> Result<Vec<(SpoolerId, ModelPackage)>> {
    dscript::model::find_model_packages(tree)
        .into_iter()
        .map(|id| -> Result<(SpoolerId, ModelPackage)> {
            let path = tree.path_of(id)?;
            let pkg = ModelPackage::from_spooler(tree, id)
                .with_context(|| format!("model package at {}", format_path(&path)))?;
            Ok((id, pkg))
        })
        .collect()
}

fn build_resolver<'a>(tree: &SpoolerTree, packages: &'a [(SpoolerId, ModelPackage)]) -> MaterialResolver<'a> {
    let globals_id = find_globals(tree);
    let mut resolver = MaterialResolver::new();
    for (id, pkg) in packages {
        if Some(*id) == globals_id {
            resolver = resolver.with_globals(pkg);
        }
        resolver.add_package(pkg);
    }
    resolver
}

fn cmd_models(path: &str) -> Result<()> {
    let file = open(path)?;
    let packages = load_packages(&file)?;
    let resolver = build_resolver(&file, &packages);

    println!("Container: {path}");
    println!("Model packages: {}", packages.len());
    for (id, pkg) in &packages {
        let s = pkg.statistics();
        println!();
        println!(
            "[{}] uid {:#010x}, {}, vertex type {}",
            format_path(&file.path_of(*id)?),
            pkg.uid,
            pkg.version,
            pkg.vertex_type
        );
        println!("  Models:     {} ({} LODs, {} instances, {} submodels)", s.models, s.lods, s.instances, s.submodels);
        println!("  Materials:  {} ({} substances, {} textures)", s.materials, s.substances, s.textures);
        println!("  Geometry:   {} vertices, {} indices, {} triangles", s.vertices, s.indices, s.triangles);
        let unresolved = resolver.unresolved(pkg);
        if !unresolved.is_empty() {
            println!("  Unresolved material handles: {}", unresolved.len());
            for sm in unresolved {
                println!("    index {} source {:#06x}", sm.material.index, sm.material.source);
            }
        }
    }
    Ok(())
}

fn cmd_copy(input: &str, output: &str) -> Result<()> {
    let mut file = open(input)?;
    file.save_as(output).with_context(|| format!("failed to write {output}"))?;
    let mut settings = Settings::load();
    settings.add_recent(output.into());
    if let Err(e) = settings.save() {
        debug!("settings not saved: {e}");
    }

    let a = std::fs::read(input)?;
    let b = std::fs::read(output)?;
    if a == b {
        println!("Copied {input} -> {output}: byte-identical ({} bytes)", b.len());
    } else {
        println!(
            "Copied {input} -> {output}: output differs ({} -> {} bytes)",
            a.len(),
            b.len()
        );
    }
    Ok(())
}

fn parse_path(path: &str) -> Result<Vec<usize>> {
    path.split(['/', '.'])
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().with_context(|| format!("bad path component '{s}'")))
        .collect()
}

fn format_path(path: &[usize]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("/")
}

fn cmd_export(input: &str, path: &str, output: &str) -> Result<()> {
    let file = open(input)?;
    let id = file
        .node_at_path(&parse_path(path)?)
        .with_context(|| format!("no node at {path}"))?;
    file.export(id, output).with_context(|| format!("failed to write {output}"))?;
    println!("Exported {} node(s) at {path} to {output}", file.descendants(id)?.len());
    Ok(())
}

fn cmd_convert(input: &str, version: &str, output: &str) -> Result<()> {
    let target = PackageVersion::from_u32(version.trim_start_matches('v').parse().context("bad version")?)?;
    let settings = Settings::load();
    let mut file = open(input)?;

    let packages = load_packages(&file)?;
    if packages.is_empty() {
        bail!("{input} holds no model packages");
    }
    let converted = packages
        .iter()
        .map(|(id, pkg)| -> Result<(SpoolerId, ModelPackage)> { Ok((*id, convert_version(pkg, target)?)) })
        .collect::<Result<Vec<_>>>()?;

    let mut encoded = Vec::with_capacity(converted.len());
    {
        let resolver = build_resolver(&file, &converted);
        for (id, pkg) in &converted {
            let bytes = if settings.strict_materials {
                pkg.save_strict(&resolver)?
            } else {
                for sm in resolver.unresolved(pkg) {
                    warn!(
                        package = pkg.uid,
                        index = sm.material.index,
                        source = sm.material.source,
                        "unresolved material handle"
                    );
                }
                pkg.save()?
            };
            encoded.push((*id, bytes));
        }
    }

    let ctx = match target.family() {
        dscript::model::Family::A => context::MODEL_PACKAGE_PC_LEGACY,
        dscript::model::Family::B => context::MODEL_PACKAGE_PC,
    };
    for (id, bytes) in encoded {
        file.set_buffer(id, bytes)?;
        file.set_context(id, ctx)?;
        file.set_version(id, target.as_u32() as u8)?;
    }
    file.save_as(output).with_context(|| format!("failed to write {output}"))?;
    println!("Converted {} model package(s) to {target}: {output}", converted.len());
    Ok(())
}
