//! `#[target]` attribute macro for dispatch targets.
//!
//! Applied to an inherent `impl` block, it keeps the block as written and adds
//! an `impl conduit_dispatch::Target` whose `type_def()` describes every `pub`
//! function:
//!
//! | Function shape | Registered as |
//! |----------------|---------------|
//! | `pub fn new(..) -> Self` / `-> Result<Self, E>` | constructor |
//! | `pub fn name(&self, ..)` | instance method |
//! | `pub fn name(..)` | static method |
//!
//! ```rust,ignore
//! use conduit_dispatch::target;
//!
//! struct Greeter { prefix: String }
//!
//! #[target(name = "demo")]
//! impl Greeter {
//!     pub fn new(#[param(default = "Hello")] prefix: String) -> Self {
//!         Self { prefix }
//!     }
//!
//!     pub fn greet(&self, name: String) -> String {
//!         format!("{}, {}", self.prefix, name)
//!     }
//! }
//!
//! // Generates:
//! // impl ::conduit_dispatch::Target for Greeter {
//! //     const NAME: &'static str = "demo";
//! //     fn type_def() -> ::conduit_dispatch::TypeDef {
//! //         ::conduit_dispatch::TypeDef::new("demo")
//! //             .constructor(vec![ParamSpec::of::<String>("prefix").with_default(json!("Hello"))], ..)
//! //             .method("greet", vec![ParamSpec::of::<String>("name")], ..)
//! //     }
//! // }
//! ```

use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    punctuated::Punctuated,
    spanned::Spanned,
    Error, Expr, FnArg, ImplItem, ImplItemFn, ItemImpl, Meta, Result, Token, Type, Visibility,
};

use crate::params::{
    args_pattern, call_args, extractions, param_specs, parse_params, returns_result,
    strip_param_attrs, value_return,
};

/// Attribute arguments for `#[target(name = "x")]`
#[derive(Default)]
struct TargetArgs {
    name: Option<String>,
}

impl Parse for TargetArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut args = TargetArgs::default();
        if input.is_empty() {
            return Ok(args);
        }

        let content: Punctuated<Meta, Token![,]> = Punctuated::parse_terminated(input)?;
        for meta in content {
            match meta {
                Meta::NameValue(nv) if nv.path.is_ident("name") => match &nv.value {
                    Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(s),
                        ..
                    }) => args.name = Some(s.value()),
                    other => return Err(Error::new(other.span(), "expected string literal")),
                },
                other => {
                    return Err(Error::new(
                        other.span(),
                        "unknown attribute, expected `name`",
                    ))
                }
            }
        }
        Ok(args)
    }
}

enum Receiver {
    Static,
    Instance,
}

fn receiver_of(method: &ImplItemFn) -> Result<Receiver> {
    match method.sig.inputs.first() {
        Some(FnArg::Receiver(recv)) => {
            if recv.reference.is_none() || recv.mutability.is_some() {
                Err(Error::new(
                    recv.span(),
                    "target instances are shared; methods must take `&self`",
                ))
            } else {
                Ok(Receiver::Instance)
            }
        }
        _ => Ok(Receiver::Static),
    }
}

/// Default target name: the type's last path segment, lowercased.
fn default_name(self_ty: &Type) -> Result<String> {
    if let Type::Path(type_path) = self_ty {
        if let Some(segment) = type_path.path.segments.last() {
            return Ok(segment.ident.to_string().to_lowercase());
        }
    }
    Err(Error::new(self_ty.span(), "#[target] requires a named type"))
}

fn generate_constructor(ctor: &ImplItemFn) -> TokenStream {
    let params = match parse_params(&ctor.sig) {
        Ok(p) => p,
        Err(e) => return e.to_compile_error(),
    };
    let specs = param_specs(&params);
    let extract = extractions(&params);
    let args = call_args(&params);
    let pat = args_pattern(&params);

    let build = if returns_result(&ctor.sig.output) {
        quote! { Self::new(#(#args),*).map_err(::conduit_dispatch::__private::anyhow::Error::from) }
    } else {
        quote! { Ok(Self::new(#(#args),*)) }
    };

    quote! {
        .constructor(#specs, |#pat: ::conduit_dispatch::Args| {
            #(#extract)*
            #build
        })
    }
}

fn generate_method(method: &ImplItemFn, receiver: Receiver) -> TokenStream {
    let params = match parse_params(&method.sig) {
        Ok(p) => p,
        Err(e) => return e.to_compile_error(),
    };
    let fn_name = &method.sig.ident;
    let key = fn_name.to_string();
    let specs = param_specs(&params);
    let extract = extractions(&params);
    let args = call_args(&params);
    let pat = args_pattern(&params);

    match receiver {
        Receiver::Instance => {
            let body = value_return(&method.sig.output, quote! { __this.#fn_name(#(#args),*) });
            quote! {
                .method(#key, #specs, |__this: &Self, #pat: ::conduit_dispatch::Args| {
                    #(#extract)*
                    #body
                })
            }
        }
        Receiver::Static => {
            let body = value_return(&method.sig.output, quote! { Self::#fn_name(#(#args),*) });
            quote! {
                .static_method(#key, #specs, |#pat: ::conduit_dispatch::Args| {
                    #(#extract)*
                    #body
                })
            }
        }
    }
}

/// Main implementation of the #[target] macro
pub fn target_impl(attr: TokenStream, item: TokenStream) -> Result<TokenStream> {
    let args: TargetArgs = syn::parse2(attr)?;
    let mut item_impl: ItemImpl = syn::parse2(item)?;

    if let Some((_, path, _)) = &item_impl.trait_ {
        return Err(Error::new(
            path.span(),
            "#[target] goes on an inherent impl block, not a trait impl",
        ));
    }
    if !item_impl.generics.params.is_empty() {
        return Err(Error::new(
            item_impl.generics.span(),
            "#[target] does not support generic impl blocks",
        ));
    }

    let self_ty = (*item_impl.self_ty).clone();
    let name = match args.name {
        Some(name) => name,
        None => default_name(&self_ty)?,
    };

    let mut constructor = None;
    let mut methods = Vec::new();

    for item in &item_impl.items {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        if !matches!(method.vis, Visibility::Public(_)) {
            continue;
        }
        let receiver = receiver_of(method)?;
        if method.sig.ident == "new" && matches!(receiver, Receiver::Static) {
            constructor = Some(generate_constructor(method));
        } else {
            methods.push(generate_method(method, receiver));
        }
    }

    // Strip #[param] from the emitted impl
    for item in &mut item_impl.items {
        if let ImplItem::Fn(method) = item {
            strip_param_attrs(&mut method.sig);
        }
    }

    Ok(quote! {
        #item_impl

        impl ::conduit_dispatch::Target for #self_ty {
            const NAME: &'static str = #name;

            fn type_def() -> ::conduit_dispatch::TypeDef {
                ::conduit_dispatch::TypeDef::new(#name)
                    #constructor
                    #(#methods)*
            }
        }
    })
}
