//! The source loader.  Parses each `.rs` file with `syn`, walks its top-level items, and builds
//! the typed program model the graph engine consumes: packages, functions with signatures,
//! structs with their fields and `#[weft(...)]` tags, traits, the `implements` relation from
//! `impl` blocks, and the resolved item trees of every `set!` and `build!` marker.
//!
//! Resolution here is purely structural.  A type is identified by how it is spelled (after
//! expanding single-name `use` aliases), not by rustc's type system; that is what lets the
//! generator run on plain source text the way the rest of the pipeline expects.  One loaded
//! file is one package.  Nested inline modules are not descended into.

use crate::error::{ErrorCollector, Pos, WeftError};
use crate::model::{
    ConstModel, ExprModel, FieldSelector, FunctionModel, IdentRef, IdentTarget, ImplModel,
    InjectorModel, MarkerItem, PackageId, PackageModel, ParamModel, ProgramModel, SetDeclModel,
    StructFieldModel, StructModel, TraitModel, TypeKey, TypeRefModel,
};
use darling::FromMeta;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use syn::parse::{Parse, ParseStream, Result as ParseResult};
use syn::spanned::Spanned;
use syn::Token;

/// One source file handed to the loader
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub path: PathBuf,
    pub content: String,
}

/// Primitive and well-known standard types that resolve without package qualification
const BUILTINS: &[&str] = &[
    "bool", "char", "str", "String", "i8", "i16", "i32", "i64", "i128", "u8", "u16", "u32",
    "u64", "u128", "f32", "f64", "isize", "usize", "Result", "Option", "Vec", "Box", "Arc",
    "Rc", "PathBuf",
];

/// Loads every `.rs` file under `dir` (recursively, in sorted order, skipping generated
/// output) and builds the program model.
pub fn load_dir(dir: &Path) -> (ProgramModel, Vec<WeftError>) {
    let mut errors = ErrorCollector::new();
    let mut files = Vec::new();
    collect_rs_files(dir, dir, &mut files, &mut errors);
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let (model, load_errors) = load_sources(files);
    let mut all = errors.into_errors();
    all.extend(load_errors);
    (model, all)
}

fn collect_rs_files(
    root: &Path,
    dir: &Path,
    files: &mut Vec<SourceInput>,
    errors: &mut ErrorCollector,
) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            errors.add(WeftError::io_error(format!(
                "could not read directory {}: {}",
                dir.display(),
                e
            )));
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            collect_rs_files(root, &path, files, errors);
        } else if path.extension().map(|e| e == "rs").unwrap_or(false) {
            if path.file_name().map(|n| n == "weft_gen.rs").unwrap_or(false) {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => files.push(SourceInput {
                    path: path.strip_prefix(root).unwrap_or(&path).to_owned(),
                    content,
                }),
                Err(e) => errors.add(WeftError::io_error(format!(
                    "could not read {}: {}",
                    path.display(),
                    e
                ))),
            }
        }
    }
}

/// Parses the given sources and builds the program model, collecting every problem found along
/// the way rather than stopping at the first.
pub fn load_sources(sources: Vec<SourceInput>) -> (ProgramModel, Vec<WeftError>) {
    let mut errors = ErrorCollector::new();

    //Parse everything first
    let mut parsed: Vec<(PackageId, PathBuf, syn::File)> = Vec::new();
    for source in sources {
        match syn::parse_file(&source.content) {
            Ok(file) => {
                let pkg = PackageId::new(package_path(&source.path));
                parsed.push((pkg, source.path, file));
            }
            Err(e) => {
                let start = e.span().start();
                errors.add(
                    WeftError::parse_error(format!("could not parse source file: {}", e)).at(
                        Pos::new(source.path.clone(), start.line, start.column + 1),
                    ),
                );
            }
        }
    }

    //First pass: name tables, so cross-package type spellings resolve regardless of file order
    let mut tables = NameTables::default();
    for (pkg, _, file) in &parsed {
        tables.scan(pkg, file);
    }

    let loader = Loader { tables };

    //Second pass: plain items (everything except markers)
    let mut model = ProgramModel::default();
    for (pkg, path, file) in &parsed {
        let ctx = loader.file_ctx(pkg, path, file);
        model.packages.push(loader.load_plain_items(&ctx, file, &mut errors));
    }

    //Third pass: markers, which need the plain items of every package for expression typing
    let mut sets: Vec<(usize, Rc<SetDeclModel>)> = Vec::new();
    let mut injectors: Vec<(usize, InjectorModel)> = Vec::new();
    for (index, (pkg, path, file)) in parsed.iter().enumerate() {
        let ctx = loader.file_ctx(pkg, path, file);
        loader.load_markers(&ctx, file, &model, index, &mut sets, &mut injectors, &mut errors);
    }
    for (index, set) in sets {
        model.packages[index].sets.push(set);
    }
    for (index, injector) in injectors {
        model.packages[index].injectors.push(injector);
    }

    (model, errors.into_errors())
}

/// Maps a source path to its package import path: `src/sub/store.rs` becomes `sub::store`,
/// and `mod.rs`/`lib.rs`/`main.rs` fall back to their directory
fn package_path(path: &Path) -> String {
    let stripped = path.with_extension("");
    let mut comps: Vec<String> = stripped
        .components()
        .filter_map(|c| match c {
            Component::Normal(os) => Some(os.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if comps.first().map(|c| c == "src").unwrap_or(false) {
        comps.remove(0);
    }
    if comps
        .last()
        .map(|c| c == "mod" || c == "lib" || c == "main")
        .unwrap_or(false)
    {
        comps.pop();
    }
    if comps.is_empty() {
        "crate".to_owned()
    } else {
        comps.join("::")
    }
}

/// Arguments of a `#[weft(...)]` attribute on a function
#[derive(Debug, Default, FromMeta)]
struct WeftFnArgs {
    #[darling(default)]
    variadic: bool,
}

#[derive(Default)]
struct NameTables {
    types: HashMap<String, HashSet<String>>,
    traits: HashMap<String, HashSet<String>>,
}

impl NameTables {
    fn scan(&mut self, pkg: &PackageId, file: &syn::File) {
        let types = self.types.entry(pkg.import_path.clone()).or_default();
        let traits = self.traits.entry(pkg.import_path.clone()).or_default();
        for item in &file.items {
            match item {
                syn::Item::Struct(s) => {
                    types.insert(s.ident.to_string());
                }
                syn::Item::Enum(e) => {
                    types.insert(e.ident.to_string());
                }
                syn::Item::Type(t) => {
                    types.insert(t.ident.to_string());
                }
                syn::Item::Trait(t) => {
                    traits.insert(t.ident.to_string());
                }
                _ => {}
            }
        }
    }

    fn is_type(&self, pkg: &str, name: &str) -> bool {
        self.types
            .get(pkg)
            .map(|names| names.contains(name))
            .unwrap_or(false)
    }

    fn is_trait(&self, pkg: &str, name: &str) -> bool {
        self.traits
            .get(pkg)
            .map(|names| names.contains(name))
            .unwrap_or(false)
    }
}

/// Per-file resolution context: the package, the path for positions, and the single-name `use`
/// aliases in scope
struct FileCtx {
    pkg: PackageId,
    path: PathBuf,
    aliases: HashMap<String, Vec<String>>,
}

impl FileCtx {
    fn pos(&self, span: proc_macro2::Span) -> Pos {
        let start = span.start();
        Pos::new(self.path.clone(), start.line, start.column + 1)
    }
}

struct Loader {
    tables: NameTables,
}

impl Loader {
    fn file_ctx(&self, pkg: &PackageId, path: &Path, file: &syn::File) -> FileCtx {
        let mut aliases = HashMap::new();
        for item in &file.items {
            if let syn::Item::Use(u) = item {
                collect_use_aliases(&u.tree, &mut Vec::new(), &mut aliases);
            }
        }
        FileCtx {
            pkg: pkg.clone(),
            path: path.to_owned(),
            aliases,
        }
    }

    fn load_plain_items(
        &self,
        ctx: &FileCtx,
        file: &syn::File,
        errors: &mut ErrorCollector,
    ) -> PackageModel {
        let mut package = PackageModel::default();
        package.id = ctx.pkg.clone();

        for item in &file.items {
            match item {
                syn::Item::Struct(s) => self.load_struct(ctx, s, &mut package, errors),
                syn::Item::Trait(t) => package.traits.push(TraitModel {
                    name: t.ident.to_string(),
                    pkg: ctx.pkg.clone(),
                    pos: ctx.pos(t.span()),
                    exported: is_exported(&t.vis),
                }),
                syn::Item::Const(c) => {
                    if !is_provider_set_type(&c.ty) {
                        self.load_const(ctx, &c.ident, &c.vis, &c.ty, c.span(), &mut package);
                    }
                }
                syn::Item::Static(s) => {
                    if !is_provider_set_type(&s.ty) {
                        self.load_const(ctx, &s.ident, &s.vis, &s.ty, s.span(), &mut package);
                    }
                }
                syn::Item::Fn(f) => self.load_fn(ctx, f, &mut package, errors),
                syn::Item::Impl(i) => self.load_impl(ctx, i, &mut package),
                _ => {}
            }
        }

        package
    }

    fn load_struct(
        &self,
        ctx: &FileCtx,
        s: &syn::ItemStruct,
        package: &mut PackageModel,
        errors: &mut ErrorCollector,
    ) {
        let mut fields = Vec::new();
        if let syn::Fields::Named(named) = &s.fields {
            for field in &named.named {
                let name = field
                    .ident
                    .as_ref()
                    .expect("named fields have idents")
                    .to_string();
                let key = match self.type_key(ctx, &field.ty) {
                    Some(key) => key,
                    None => {
                        errors.add(
                            WeftError::parse_error(format!(
                                "unsupported type for field \"{}\" of struct {}",
                                name, s.ident
                            ))
                            .at(ctx.pos(field.span())),
                        );
                        continue;
                    }
                };
                fields.push(StructFieldModel {
                    name,
                    key,
                    exported: is_exported(&field.vis),
                    prevented: field_prevented(&field.attrs),
                    pos: ctx.pos(field.span()),
                });
            }
        }

        package.structs.push(Rc::new(StructModel {
            name: s.ident.to_string(),
            pkg: ctx.pkg.clone(),
            pos: ctx.pos(s.span()),
            exported: is_exported(&s.vis),
            fields,
        }));
    }

    fn load_const(
        &self,
        ctx: &FileCtx,
        ident: &syn::Ident,
        vis: &syn::Visibility,
        ty: &syn::Type,
        span: proc_macro2::Span,
        package: &mut PackageModel,
    ) {
        if let Some(key) = self.type_key(ctx, ty) {
            package.consts.push(ConstModel {
                name: ident.to_string(),
                pkg: ctx.pkg.clone(),
                pos: ctx.pos(span),
                exported: is_exported(vis),
                key,
            });
        }
    }

    fn load_fn(
        &self,
        ctx: &FileCtx,
        f: &syn::ItemFn,
        package: &mut PackageModel,
        errors: &mut ErrorCollector,
    ) {
        //Injector stubs are handled in the marker pass; here they would only look like
        //functions with an unusual body
        if find_build_macro(&f.block).is_some() {
            return;
        }

        let args = match weft_fn_args(ctx, &f.attrs, errors) {
            Some(args) => args,
            None => return,
        };

        let mut params = Vec::new();
        for input in &f.sig.inputs {
            match input {
                syn::FnArg::Typed(pt) => {
                    let name = match pt.pat.as_ref() {
                        syn::Pat::Ident(ident) => ident.ident.to_string(),
                        _ => "_".to_owned(),
                    };
                    match self.type_key(ctx, &pt.ty) {
                        Some(key) => params.push(ParamModel { name, key }),
                        None => {
                            errors.add(
                                WeftError::parse_error(format!(
                                    "unsupported parameter type on function {}",
                                    f.sig.ident
                                ))
                                .at(ctx.pos(pt.span())),
                            );
                            return;
                        }
                    }
                }
                syn::FnArg::Receiver(_) => return,
            }
        }

        let ret = match &f.sig.output {
            syn::ReturnType::Default => None,
            syn::ReturnType::Type(_, ty) => match self.type_key(ctx, ty) {
                Some(key) => Some(key),
                None => {
                    errors.add(
                        WeftError::parse_error(format!(
                            "unsupported return type on function {}",
                            f.sig.ident
                        ))
                        .at(ctx.pos(f.sig.output.span())),
                    );
                    return;
                }
            },
        };

        package.functions.push(Rc::new(FunctionModel {
            name: f.sig.ident.to_string(),
            pkg: ctx.pkg.clone(),
            pos: ctx.pos(f.span()),
            exported: is_exported(&f.vis),
            params,
            ret,
            variadic: args.variadic,
        }));
    }

    fn load_impl(&self, ctx: &FileCtx, i: &syn::ItemImpl, package: &mut PackageModel) {
        //Generic impls are outside the structural model
        if !i.generics.params.is_empty() {
            return;
        }
        let trait_path = match &i.trait_ {
            Some((None, path, _)) => path,
            _ => return,
        };
        let trait_key = match self.path_type_key(ctx, trait_path, true) {
            Some(key) => key,
            None => return,
        };
        let for_key = match self.type_key(ctx, &i.self_ty) {
            Some(key) => key,
            None => return,
        };
        package.impls.push(ImplModel {
            trait_key,
            for_key,
            pos: ctx.pos(i.span()),
        });
    }

    /// Third pass: provider set statics and injector stubs
    #[allow(clippy::too_many_arguments)]
    fn load_markers(
        &self,
        ctx: &FileCtx,
        file: &syn::File,
        model: &ProgramModel,
        package_index: usize,
        sets: &mut Vec<(usize, Rc<SetDeclModel>)>,
        injectors: &mut Vec<(usize, InjectorModel)>,
        errors: &mut ErrorCollector,
    ) {
        for item in &file.items {
            match item {
                syn::Item::Static(s) if is_provider_set_type(&s.ty) => {
                    if let Some(items) =
                        self.set_items_from_init(ctx, model, &s.expr, s.span(), errors)
                    {
                        sets.push((
                            package_index,
                            Rc::new(SetDeclModel {
                                name: s.ident.to_string(),
                                pkg: ctx.pkg.clone(),
                                pos: ctx.pos(s.span()),
                                exported: is_exported(&s.vis),
                                items,
                            }),
                        ));
                    }
                }
                syn::Item::Const(c) if is_provider_set_type(&c.ty) => {
                    if let Some(items) =
                        self.set_items_from_init(ctx, model, &c.expr, c.span(), errors)
                    {
                        sets.push((
                            package_index,
                            Rc::new(SetDeclModel {
                                name: c.ident.to_string(),
                                pkg: ctx.pkg.clone(),
                                pos: ctx.pos(c.span()),
                                exported: is_exported(&c.vis),
                                items,
                            }),
                        ));
                    }
                }
                syn::Item::Fn(f) => {
                    if let Some(mac) = find_build_macro(&f.block) {
                        self.load_injector(ctx, model, f, mac, package_index, injectors, errors);
                    }
                }
                _ => {}
            }
        }
    }

    fn set_items_from_init(
        &self,
        ctx: &FileCtx,
        model: &ProgramModel,
        expr: &syn::Expr,
        span: proc_macro2::Span,
        errors: &mut ErrorCollector,
    ) -> Option<Vec<MarkerItem>> {
        match expr {
            syn::Expr::Macro(m) if macro_name_is(&m.mac, "set") => {
                self.marker_items(ctx, model, m.mac.tokens.clone(), &HashMap::new(), errors)
            }
            _ => {
                errors.add(
                    WeftError::parse_error(
                        "a weft::ProviderSet must be initialized with weft::set!",
                    )
                    .at(ctx.pos(span)),
                );
                None
            }
        }
    }

    fn load_injector(
        &self,
        ctx: &FileCtx,
        model: &ProgramModel,
        f: &syn::ItemFn,
        mac: &syn::Macro,
        package_index: usize,
        injectors: &mut Vec<(usize, InjectorModel)>,
        errors: &mut ErrorCollector,
    ) {
        //The body must be exactly the one build! call; anything else in the block means the
        //stub is not purely declarative
        if f.block.stmts.len() != 1 {
            errors.add(
                WeftError::invalid_injector(format!(
                    "the body of injector {} must be a single weft::build! call",
                    f.sig.ident
                ))
                .at(ctx.pos(f.span())),
            );
            return;
        }

        let mut params = Vec::new();
        let mut locals = HashMap::new();
        for input in &f.sig.inputs {
            match input {
                syn::FnArg::Typed(pt) => {
                    let name = match pt.pat.as_ref() {
                        syn::Pat::Ident(ident) => ident.ident.to_string(),
                        _ => "_".to_owned(),
                    };
                    match self.type_key(ctx, &pt.ty) {
                        Some(key) => {
                            locals.insert(name.clone(), key.clone());
                            params.push(ParamModel { name, key });
                        }
                        None => {
                            errors.add(
                                WeftError::parse_error(format!(
                                    "unsupported parameter type on injector {}",
                                    f.sig.ident
                                ))
                                .at(ctx.pos(pt.span())),
                            );
                            return;
                        }
                    }
                }
                syn::FnArg::Receiver(_) => return,
            }
        }

        let ret = match &f.sig.output {
            syn::ReturnType::Default => None,
            syn::ReturnType::Type(_, ty) => match self.type_key(ctx, ty) {
                Some(key) => Some(key),
                None => {
                    errors.add(
                        WeftError::parse_error(format!(
                            "unsupported return type on injector {}",
                            f.sig.ident
                        ))
                        .at(ctx.pos(f.sig.output.span())),
                    );
                    return;
                }
            },
        };

        if let Some(items) = self.marker_items(ctx, model, mac.tokens.clone(), &locals, errors) {
            injectors.push((
                package_index,
                InjectorModel {
                    name: f.sig.ident.to_string(),
                    pkg: ctx.pkg.clone(),
                    pos: ctx.pos(f.span()),
                    exported: is_exported(&f.vis),
                    params,
                    ret,
                    items,
                },
            ));
        }
    }

    /// Parses the comma-separated contents of a `set!`/`build!` invocation into marker items
    fn marker_items(
        &self,
        ctx: &FileCtx,
        model: &ProgramModel,
        tokens: proc_macro2::TokenStream,
        locals: &HashMap<String, TypeKey>,
        errors: &mut ErrorCollector,
    ) -> Option<Vec<MarkerItem>> {
        let ast: SetItemsAst = match syn::parse2(tokens) {
            Ok(ast) => ast,
            Err(e) => {
                let start = e.span().start();
                errors.add(
                    WeftError::parse_error(format!("could not parse marker items: {}", e))
                        .at(Pos::new(ctx.path.clone(), start.line, start.column + 1)),
                );
                return None;
            }
        };

        let before = errors.len();
        let mut items = Vec::new();
        for expr in ast.items {
            if let Some(item) = self.marker_item(ctx, model, &expr, locals, errors) {
                items.push(item);
            }
        }
        if errors.len() > before {
            None
        } else {
            Some(items)
        }
    }

    fn marker_item(
        &self,
        ctx: &FileCtx,
        model: &ProgramModel,
        expr: &syn::Expr,
        locals: &HashMap<String, TypeKey>,
        errors: &mut ErrorCollector,
    ) -> Option<MarkerItem> {
        let pos = ctx.pos(expr.span());
        match expr {
            syn::Expr::Path(p) => {
                let mut path: Vec<String> = p
                    .path
                    .segments
                    .iter()
                    .map(|s| s.ident.to_string())
                    .collect();
                if path.len() == 1 {
                    if let Some(full) = ctx.aliases.get(&path[0]) {
                        path = full.clone();
                    }
                }
                Some(MarkerItem::Use { path, pos })
            }
            syn::Expr::Macro(m) => self.marker_macro(ctx, model, &m.mac, locals, pos, errors),
            _ => {
                errors.add(
                    WeftError::invalid_argument(
                        "unsupported item in set!/build!; expected a path or a weft marker",
                    )
                    .at(pos),
                );
                None
            }
        }
    }

    fn marker_macro(
        &self,
        ctx: &FileCtx,
        model: &ProgramModel,
        mac: &syn::Macro,
        locals: &HashMap<String, TypeKey>,
        pos: Pos,
        errors: &mut ErrorCollector,
    ) -> Option<MarkerItem> {
        if macro_name_is(mac, "bind") {
            let args: BindArgsAst = self.parse_marker_tokens(ctx, mac, errors)?;
            let iface = self.type_ref(ctx, &args.iface, errors)?;
            let concrete = self.type_ref(ctx, &args.concrete, errors)?;
            Some(MarkerItem::Bind {
                iface,
                concrete,
                pos,
            })
        } else if macro_name_is(mac, "value") {
            let expr: syn::Expr = self.parse_marker_tokens(ctx, mac, errors)?;
            let expr = self.expr_model(ctx, model, expr, locals);
            Some(MarkerItem::Value { expr, pos })
        } else if macro_name_is(mac, "interface_value") {
            let args: IfaceExprAst = self.parse_marker_tokens(ctx, mac, errors)?;
            let iface = self.type_ref(ctx, &args.iface, errors)?;
            let expr = self.expr_model(ctx, model, args.expr, locals);
            Some(MarkerItem::InterfaceValue { iface, expr, pos })
        } else if macro_name_is(mac, "struct_provider") {
            let args: TargetFieldsAst = self.parse_marker_tokens(ctx, mac, errors)?;
            let target = self.type_ref(ctx, &args.ty, errors)?;
            let fields = self.field_selector(&args, "struct_provider!", &pos, errors)?;
            Some(MarkerItem::StructLit {
                target,
                fields,
                pos,
            })
        } else if macro_name_is(mac, "fields_of") {
            let args: TargetFieldsAst = self.parse_marker_tokens(ctx, mac, errors)?;
            let target = self.type_ref(ctx, &args.ty, errors)?;
            let fields = self.field_selector(&args, "fields_of!", &pos, errors)?;
            Some(MarkerItem::FieldsOf {
                target,
                fields,
                pos,
            })
        } else {
            errors.add(
                WeftError::invalid_argument(format!(
                    "unknown marker {}! in set!/build!",
                    mac.path
                        .segments
                        .last()
                        .map(|s| s.ident.to_string())
                        .unwrap_or_default()
                ))
                .at(pos),
            );
            None
        }
    }

    fn parse_marker_tokens<T: Parse>(
        &self,
        ctx: &FileCtx,
        mac: &syn::Macro,
        errors: &mut ErrorCollector,
    ) -> Option<T> {
        match syn::parse2(mac.tokens.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                let start = e.span().start();
                errors.add(
                    WeftError::invalid_argument(format!("invalid marker arguments: {}", e))
                        .at(Pos::new(ctx.path.clone(), start.line, start.column + 1)),
                );
                None
            }
        }
    }

    fn field_selector(
        &self,
        args: &TargetFieldsAst,
        construct: &str,
        pos: &Pos,
        errors: &mut ErrorCollector,
    ) -> Option<FieldSelector> {
        if args.fields.is_empty() {
            errors.add(
                WeftError::invalid_argument(format!(
                    "{} expects field names or \"*\" after the struct type",
                    construct
                ))
                .at(pos.clone()),
            );
            return None;
        }
        let names: Vec<String> = args.fields.iter().map(|lit| lit.value()).collect();
        if names.len() == 1 && names[0] == "*" {
            Some(FieldSelector::All)
        } else {
            //A "*" mixed in with explicit names is rejected later, during field selection
            Some(FieldSelector::Named(names))
        }
    }

    fn type_ref(
        &self,
        ctx: &FileCtx,
        ty: &syn::Type,
        errors: &mut ErrorCollector,
    ) -> Option<TypeRefModel> {
        let pos = ctx.pos(ty.span());
        match self.type_key(ctx, ty) {
            Some(key) => Some(TypeRefModel { key, pos }),
            None => {
                errors.add(
                    WeftError::parse_error("unsupported type in marker arguments").at(pos),
                );
                None
            }
        }
    }

    /// Structural resolution of a type spelling into a `TypeKey`
    fn type_key(&self, ctx: &FileCtx, ty: &syn::Type) -> Option<TypeKey> {
        match ty {
            syn::Type::Path(tp) if tp.qself.is_none() => {
                self.path_type_key(ctx, &tp.path, false)
            }
            syn::Type::Reference(r) => self
                .type_key(ctx, &r.elem)
                .map(|inner| TypeKey::Ref(Box::new(inner))),
            syn::Type::TraitObject(to) => self.bound_trait_key(ctx, &to.bounds),
            syn::Type::ImplTrait(it) => self.bound_trait_key(ctx, &it.bounds),
            syn::Type::Tuple(t) => {
                if t.elems.is_empty() {
                    Some(TypeKey::Unit)
                } else {
                    let elems: Option<Vec<TypeKey>> =
                        t.elems.iter().map(|e| self.type_key(ctx, e)).collect();
                    elems.map(TypeKey::Tuple)
                }
            }
            syn::Type::Paren(p) => self.type_key(ctx, &p.elem),
            syn::Type::Group(g) => self.type_key(ctx, &g.elem),
            _ => None,
        }
    }

    fn bound_trait_key(
        &self,
        ctx: &FileCtx,
        bounds: &syn::punctuated::Punctuated<syn::TypeParamBound, Token![+]>,
    ) -> Option<TypeKey> {
        bounds.iter().find_map(|bound| match bound {
            syn::TypeParamBound::Trait(tb) => self.path_type_key(ctx, &tb.path, true),
            syn::TypeParamBound::Lifetime(_) => None,
        })
    }

    fn path_type_key(
        &self,
        ctx: &FileCtx,
        path: &syn::Path,
        force_trait: bool,
    ) -> Option<TypeKey> {
        let segs: Vec<String> = path.segments.iter().map(|s| s.ident.to_string()).collect();

        let args = match &path.segments.last()?.arguments {
            syn::PathArguments::None => Vec::new(),
            syn::PathArguments::AngleBracketed(ab) => {
                let mut keys = Vec::new();
                for arg in &ab.args {
                    match arg {
                        syn::GenericArgument::Type(t) => keys.push(self.type_key(ctx, t)?),
                        syn::GenericArgument::Lifetime(_) => {}
                        _ => return None,
                    }
                }
                keys
            }
            syn::PathArguments::Parenthesized(_) => return None,
        };

        let base = self.resolve_base(ctx, &segs, force_trait)?;
        if args.is_empty() {
            Some(base)
        } else {
            Some(TypeKey::apply(base, args))
        }
    }

    fn resolve_base(&self, ctx: &FileCtx, segs: &[String], force_trait: bool) -> Option<TypeKey> {
        match segs {
            [] => None,
            [single] => {
                if let Some(full) = ctx.aliases.get(single) {
                    return self.resolve_base(ctx, full, force_trait);
                }
                let name = single.as_str();
                if self.tables.is_trait(&ctx.pkg.import_path, name) {
                    Some(TypeKey::trait_(ctx.pkg.import_path.clone(), name))
                } else if self.tables.is_type(&ctx.pkg.import_path, name) {
                    Some(TypeKey::named(ctx.pkg.import_path.clone(), name))
                } else if BUILTINS.contains(&name) {
                    Some(TypeKey::builtin(name))
                } else if force_trait {
                    Some(TypeKey::trait_(ctx.pkg.import_path.clone(), name))
                } else {
                    Some(TypeKey::named(ctx.pkg.import_path.clone(), name))
                }
            }
            multi => {
                let name = multi.last().unwrap().as_str();
                let pkg = multi[..multi.len() - 1].join("::");
                if pkg == "weft" {
                    return Some(TypeKey::named("weft", name));
                }
                let std_root = matches!(multi[0].as_str(), "std" | "core" | "alloc");
                if std_root && BUILTINS.contains(&name) {
                    return Some(TypeKey::builtin(name));
                }
                if self.tables.is_trait(&pkg, name) || force_trait {
                    Some(TypeKey::trait_(pkg, name))
                } else {
                    Some(TypeKey::named(pkg, name))
                }
            }
        }
    }

    /// Annotates a value expression with its inferred type and the identifiers it references
    fn expr_model(
        &self,
        ctx: &FileCtx,
        model: &ProgramModel,
        expr: syn::Expr,
        locals: &HashMap<String, TypeKey>,
    ) -> ExprModel {
        let key = self.infer_expr_key(ctx, model, &expr, locals);
        let mut refs = Vec::new();
        self.collect_expr_refs(ctx, model, &expr, locals, &mut refs);
        let pos = ctx.pos(expr.span());
        ExprModel {
            expr,
            key,
            refs,
            pos,
        }
    }

    fn infer_expr_key(
        &self,
        ctx: &FileCtx,
        model: &ProgramModel,
        expr: &syn::Expr,
        locals: &HashMap<String, TypeKey>,
    ) -> Option<TypeKey> {
        match expr {
            syn::Expr::Lit(l) => match &l.lit {
                syn::Lit::Int(i) => {
                    if i.suffix().is_empty() {
                        Some(TypeKey::builtin("i32"))
                    } else {
                        Some(TypeKey::builtin(i.suffix()))
                    }
                }
                syn::Lit::Float(f) => {
                    if f.suffix().is_empty() {
                        Some(TypeKey::builtin("f64"))
                    } else {
                        Some(TypeKey::builtin(f.suffix()))
                    }
                }
                syn::Lit::Str(_) => Some(TypeKey::Ref(Box::new(TypeKey::builtin("str")))),
                syn::Lit::Bool(_) => Some(TypeKey::builtin("bool")),
                syn::Lit::Char(_) => Some(TypeKey::builtin("char")),
                syn::Lit::Byte(_) => Some(TypeKey::builtin("u8")),
                _ => None,
            },
            syn::Expr::Path(p) => {
                let segs: Vec<String> =
                    p.path.segments.iter().map(|s| s.ident.to_string()).collect();
                match segs.as_slice() {
                    [single] => {
                        if let Some(key) = locals.get(single) {
                            return Some(key.clone());
                        }
                        if let Some(full) = ctx.aliases.get(single) {
                            return self.lookup_value_key(ctx, model, full);
                        }
                        self.lookup_value_key_in(
                            ctx,
                            model,
                            &ctx.pkg.import_path.clone(),
                            single,
                        )
                    }
                    multi => self.lookup_value_key(ctx, model, multi),
                }
            }
            syn::Expr::Struct(s) => self.path_type_key(ctx, &s.path, false),
            syn::Expr::Reference(r) => self
                .infer_expr_key(ctx, model, &r.expr, locals)
                .map(|inner| TypeKey::Ref(Box::new(inner))),
            syn::Expr::Paren(p) => self.infer_expr_key(ctx, model, &p.expr, locals),
            syn::Expr::Group(g) => self.infer_expr_key(ctx, model, &g.expr, locals),
            syn::Expr::Unary(u) => self.infer_expr_key(ctx, model, &u.expr, locals),
            syn::Expr::Binary(b) => self.infer_expr_key(ctx, model, &b.left, locals),
            syn::Expr::Cast(c) => self.type_key(ctx, &c.ty),
            syn::Expr::Tuple(t) => {
                let elems: Option<Vec<TypeKey>> = t
                    .elems
                    .iter()
                    .map(|e| self.infer_expr_key(ctx, model, e, locals))
                    .collect();
                elems.map(TypeKey::Tuple)
            }
            _ => None,
        }
    }

    fn lookup_value_key(
        &self,
        ctx: &FileCtx,
        model: &ProgramModel,
        segs: &[String],
    ) -> Option<TypeKey> {
        match segs {
            [] => None,
            [single] => {
                self.lookup_value_key_in(ctx, model, &ctx.pkg.import_path.clone(), single)
            }
            multi => {
                let pkg = multi[..multi.len() - 1].join("::");
                self.lookup_value_key_in(ctx, model, &pkg, multi.last().unwrap())
            }
        }
    }

    fn lookup_value_key_in(
        &self,
        _ctx: &FileCtx,
        model: &ProgramModel,
        pkg: &str,
        name: &str,
    ) -> Option<TypeKey> {
        if let Some(c) = model.const_model(pkg, name) {
            return Some(c.key.clone());
        }
        //A bare path to a unit struct is a value of that struct type
        if self.tables.is_type(pkg, name) {
            return Some(TypeKey::named(pkg, name));
        }
        None
    }

    fn collect_expr_refs(
        &self,
        ctx: &FileCtx,
        model: &ProgramModel,
        expr: &syn::Expr,
        locals: &HashMap<String, TypeKey>,
        refs: &mut Vec<IdentRef>,
    ) {
        match expr {
            syn::Expr::Path(p) => {
                let segs: Vec<String> =
                    p.path.segments.iter().map(|s| s.ident.to_string()).collect();
                let pos = ctx.pos(p.span());
                let (name, target) = match segs.as_slice() {
                    [] => return,
                    [single] => {
                        if locals.contains_key(single) {
                            (single.clone(), IdentTarget::Local)
                        } else if let Some(full) = ctx.aliases.get(single) {
                            let full = full.clone();
                            (
                                single.clone(),
                                self.resolve_ref_target(model, &full),
                            )
                        } else {
                            let segs =
                                vec![ctx.pkg.import_path.clone(), single.clone()];
                            (single.clone(), self.resolve_ref_target(model, &segs))
                        }
                    }
                    multi => (
                        multi.join("::"),
                        self.resolve_ref_target(model, multi),
                    ),
                };
                refs.push(IdentRef { name, target, pos });
            }
            syn::Expr::Struct(s) => {
                let segs: Vec<String> =
                    s.path.segments.iter().map(|seg| seg.ident.to_string()).collect();
                let pos = ctx.pos(s.path.span());
                let segs = if segs.len() == 1 {
                    match ctx.aliases.get(&segs[0]) {
                        Some(full) => full.clone(),
                        None => vec![ctx.pkg.import_path.clone(), segs[0].clone()],
                    }
                } else {
                    segs
                };
                refs.push(IdentRef {
                    name: segs.join("::"),
                    target: self.resolve_ref_target(model, &segs),
                    pos,
                });
                for field in &s.fields {
                    self.collect_expr_refs(ctx, model, &field.expr, locals, refs);
                }
            }
            syn::Expr::Reference(r) => self.collect_expr_refs(ctx, model, &r.expr, locals, refs),
            syn::Expr::Paren(p) => self.collect_expr_refs(ctx, model, &p.expr, locals, refs),
            syn::Expr::Group(g) => self.collect_expr_refs(ctx, model, &g.expr, locals, refs),
            syn::Expr::Unary(u) => self.collect_expr_refs(ctx, model, &u.expr, locals, refs),
            syn::Expr::Binary(b) => {
                self.collect_expr_refs(ctx, model, &b.left, locals, refs);
                self.collect_expr_refs(ctx, model, &b.right, locals, refs);
            }
            syn::Expr::Cast(c) => self.collect_expr_refs(ctx, model, &c.expr, locals, refs),
            syn::Expr::Field(f) => self.collect_expr_refs(ctx, model, &f.base, locals, refs),
            syn::Expr::Tuple(t) => {
                for elem in &t.elems {
                    self.collect_expr_refs(ctx, model, elem, locals, refs);
                }
            }
            syn::Expr::Array(a) => {
                for elem in &a.elems {
                    self.collect_expr_refs(ctx, model, elem, locals, refs);
                }
            }
            _ => {}
        }
    }

    /// Resolves a full path (package segments plus item name) to a visibility target
    fn resolve_ref_target(&self, model: &ProgramModel, segs: &[String]) -> IdentTarget {
        if segs.len() < 2 {
            return IdentTarget::Unknown;
        }
        let pkg = segs[..segs.len() - 1].join("::");
        let name = segs.last().unwrap();

        let package = match model.package(&pkg) {
            Some(package) => package,
            None => return IdentTarget::Unknown,
        };

        let exported = package
            .consts
            .iter()
            .find(|c| &c.name == name)
            .map(|c| c.exported)
            .or_else(|| {
                package
                    .structs
                    .iter()
                    .find(|s| &s.name == name)
                    .map(|s| s.exported)
            })
            .or_else(|| {
                package
                    .functions
                    .iter()
                    .find(|f| &f.name == name)
                    .map(|f| f.exported)
            })
            .or_else(|| {
                package
                    .traits
                    .iter()
                    .find(|t| &t.name == name)
                    .map(|t| t.exported)
            });

        match exported {
            Some(true) => IdentTarget::Exported,
            Some(false) => IdentTarget::PackagePrivate { pkg },
            None => IdentTarget::Unknown,
        }
    }
}

fn is_exported(vis: &syn::Visibility) -> bool {
    match vis {
        syn::Visibility::Public(_) => true,
        _ => false,
    }
}

/// True when a declared type is `weft::ProviderSet` (or an aliased spelling ending in
/// `ProviderSet`)
fn is_provider_set_type(ty: &syn::Type) -> bool {
    match ty {
        syn::Type::Path(tp) => tp
            .path
            .segments
            .last()
            .map(|s| s.ident == "ProviderSet")
            .unwrap_or(false),
        _ => false,
    }
}

fn macro_name_is(mac: &syn::Macro, name: &str) -> bool {
    mac.path
        .segments
        .last()
        .map(|s| s.ident == name)
        .unwrap_or(false)
}

/// Finds the `weft::build!` macro in a function body, if any statement is one
fn find_build_macro(block: &syn::Block) -> Option<&syn::Macro> {
    block.stmts.iter().find_map(|stmt| match stmt {
        syn::Stmt::Expr(syn::Expr::Macro(m)) | syn::Stmt::Semi(syn::Expr::Macro(m), _)
            if macro_name_is(&m.mac, "build") =>
        {
            Some(&m.mac)
        }
        _ => None,
    })
}

/// Flattens a `use` tree into single-name aliases: `use store::{new_db, Config};` yields
/// `new_db -> [store, new_db]` and `Config -> [store, Config]`.  Globs and renames of globs are
/// ignored.
fn collect_use_aliases(
    tree: &syn::UseTree,
    prefix: &mut Vec<String>,
    aliases: &mut HashMap<String, Vec<String>>,
) {
    match tree {
        syn::UseTree::Path(p) => {
            prefix.push(p.ident.to_string());
            collect_use_aliases(&p.tree, prefix, aliases);
            prefix.pop();
        }
        syn::UseTree::Name(n) => {
            let mut full = prefix.clone();
            full.push(n.ident.to_string());
            aliases.insert(n.ident.to_string(), full);
        }
        syn::UseTree::Rename(r) => {
            let mut full = prefix.clone();
            full.push(r.ident.to_string());
            aliases.insert(r.rename.to_string(), full);
        }
        syn::UseTree::Group(g) => {
            for item in &g.items {
                collect_use_aliases(item, prefix, aliases);
            }
        }
        syn::UseTree::Glob(_) => {}
    }
}

/// The comma-separated item list of a `set!`/`build!` invocation
struct SetItemsAst {
    items: syn::punctuated::Punctuated<syn::Expr, Token![,]>,
}

impl Parse for SetItemsAst {
    fn parse(input: ParseStream) -> ParseResult<Self> {
        Ok(SetItemsAst {
            items: input.parse_terminated(syn::Expr::parse)?,
        })
    }
}

/// `bind!(dyn Iface, Concrete)`
struct BindArgsAst {
    iface: syn::Type,
    concrete: syn::Type,
}

impl Parse for BindArgsAst {
    fn parse(input: ParseStream) -> ParseResult<Self> {
        let iface = input.parse()?;
        input.parse::<Token![,]>()?;
        let concrete = input.parse()?;
        if !input.is_empty() {
            input.parse::<Token![,]>()?;
        }
        Ok(BindArgsAst { iface, concrete })
    }
}

/// `interface_value!(dyn Iface, expr)`
struct IfaceExprAst {
    iface: syn::Type,
    expr: syn::Expr,
}

impl Parse for IfaceExprAst {
    fn parse(input: ParseStream) -> ParseResult<Self> {
        let iface = input.parse()?;
        input.parse::<Token![,]>()?;
        let expr = input.parse()?;
        if !input.is_empty() {
            input.parse::<Token![,]>()?;
        }
        Ok(IfaceExprAst { iface, expr })
    }
}

/// `struct_provider!(S, "a", "b")` / `fields_of!(S, "*")`
struct TargetFieldsAst {
    ty: syn::Type,
    fields: Vec<syn::LitStr>,
}

impl Parse for TargetFieldsAst {
    fn parse(input: ParseStream) -> ParseResult<Self> {
        let ty = input.parse()?;
        let mut fields = Vec::new();
        while !input.is_empty() {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                break;
            }
            fields.push(input.parse()?);
        }
        Ok(TargetFieldsAst { ty, fields })
    }
}

/// Parses the arguments of `#[weft(...)]` attributes on a function; `None` means the function
/// must be skipped because its attribute was malformed
fn weft_fn_args(
    ctx: &FileCtx,
    attrs: &[syn::Attribute],
    errors: &mut ErrorCollector,
) -> Option<WeftFnArgs> {
    for attr in attrs {
        let is_weft = attr
            .path
            .segments
            .last()
            .map(|s| s.ident == "weft")
            .unwrap_or(false);
        if !is_weft {
            continue;
        }
        match attr.parse_meta() {
            Ok(syn::Meta::List(list)) => {
                let nested: Vec<syn::NestedMeta> = list.nested.into_iter().collect();
                match WeftFnArgs::from_list(&nested) {
                    Ok(args) => return Some(args),
                    Err(e) => {
                        errors.add(
                            WeftError::invalid_argument(format!(
                                "invalid #[weft(...)] attribute: {}",
                                e
                            ))
                            .at(ctx.pos(attr.span())),
                        );
                        return None;
                    }
                }
            }
            _ => {
                errors.add(
                    WeftError::invalid_argument("invalid #[weft(...)] attribute")
                        .at(ctx.pos(attr.span())),
                );
                return None;
            }
        }
    }
    Some(WeftFnArgs::default())
}

/// True when a struct field carries the `#[weft("-")]` opt-out tag
fn field_prevented(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| {
        let is_weft = attr
            .path
            .segments
            .last()
            .map(|s| s.ident == "weft")
            .unwrap_or(false);
        if !is_weft {
            return false;
        }
        match attr.parse_meta() {
            Ok(syn::Meta::List(list)) => list.nested.iter().any(|nested| match nested {
                syn::NestedMeta::Lit(syn::Lit::Str(s)) => s.value() == "-",
                _ => false,
            }),
            _ => false,
        }
    })
}
