//! Parameter analysis shared by `#[target]` and `#[callable]`.
//!
//! | Annotation | Effect |
//! |------------|--------|
//! | none | input key = parameter name, kind from the Rust type |
//! | `#[param(name = "x")]` | input key `x` |
//! | `#[param(default = <expr>)]` | default used when the key is absent (`json!(<expr>)`) |

use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    punctuated::Punctuated,
    spanned::Spanned,
    Error, Expr, FnArg, Meta, Pat, PatType, Result, ReturnType, Signature, Token, Type,
};

/// Parsed parameter information
pub struct ParamInfo {
    /// Pattern bound in the generated wrapper (`name` or `mut name`)
    pat: Pat,
    /// The input map key
    key: String,
    ty: Type,
    default: Option<Expr>,
}

/// Arguments of `#[param(...)]`
#[derive(Default)]
struct ParamArgs {
    name: Option<String>,
    default: Option<Expr>,
}

impl Parse for ParamArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut args = ParamArgs::default();
        let content: Punctuated<Meta, Token![,]> = Punctuated::parse_terminated(input)?;

        for meta in content {
            let nv = match meta {
                Meta::NameValue(nv) => nv,
                other => {
                    return Err(Error::new(
                        other.span(),
                        "expected `name = \"...\"` or `default = <expr>`",
                    ))
                }
            };
            if nv.path.is_ident("name") {
                match &nv.value {
                    Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(s),
                        ..
                    }) => args.name = Some(s.value()),
                    other => return Err(Error::new(other.span(), "expected string literal")),
                }
            } else if nv.path.is_ident("default") {
                args.default = Some(nv.value.clone());
            } else {
                return Err(Error::new(
                    nv.path.span(),
                    "unknown attribute, expected `name` or `default`",
                ));
            }
        }

        Ok(args)
    }
}

fn parse_param(pat_type: &PatType) -> Result<ParamInfo> {
    let mut args = ParamArgs::default();
    for attr in &pat_type.attrs {
        if attr.path().is_ident("param") {
            args = attr.parse_args()?;
        }
    }

    let ident = match pat_type.pat.as_ref() {
        Pat::Ident(p) => p.ident.to_string(),
        other => {
            return Err(Error::new(
                other.span(),
                "expected identifier pattern for parameter",
            ))
        }
    };

    Ok(ParamInfo {
        pat: (*pat_type.pat).clone(),
        key: args.name.unwrap_or(ident),
        ty: (*pat_type.ty).clone(),
        default: args.default,
    })
}

/// Collects the typed parameters of a signature, skipping any receiver.
pub fn parse_params(sig: &Signature) -> Result<Vec<ParamInfo>> {
    sig.inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Typed(pat_type) => Some(parse_param(pat_type)),
            FnArg::Receiver(_) => None,
        })
        .collect()
}

/// Removes `#[param]` so the emitted function compiles.
pub fn strip_param_attrs(sig: &mut Signature) {
    for arg in &mut sig.inputs {
        if let FnArg::Typed(pat_type) = arg {
            pat_type.attrs.retain(|attr| !attr.path().is_ident("param"));
        }
    }
}

/// `vec![ParamSpec::of::<T>("key").with_default(...), ...]`
pub fn param_specs(params: &[ParamInfo]) -> TokenStream {
    let specs = params.iter().map(|p| {
        let key = &p.key;
        let ty = &p.ty;
        let base = quote! { ::conduit_dispatch::ParamSpec::of::<#ty>(#key) };
        match &p.default {
            Some(expr) => quote! {
                #base.with_default(::conduit_dispatch::__private::serde_json::json!(#expr))
            },
            None => base,
        }
    });
    quote! { ::std::vec![#(#specs),*] }
}

/// `let name: T = __args.take::<T>(i)?;` for every parameter.
pub fn extractions(params: &[ParamInfo]) -> Vec<TokenStream> {
    params
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            let pat = &p.pat;
            let ty = &p.ty;
            quote! { let #pat: #ty = __args.take::<#ty>(#idx)?; }
        })
        .collect()
}

/// Closure pattern for the `Args` parameter; `_` when nothing is extracted.
pub fn args_pattern(params: &[ParamInfo]) -> TokenStream {
    if params.is_empty() {
        quote! { _ }
    } else {
        quote! { mut __args }
    }
}

/// Identifiers to pass to the wrapped function, in order.
pub fn call_args(params: &[ParamInfo]) -> Vec<TokenStream> {
    params
        .iter()
        .map(|p| match &p.pat {
            Pat::Ident(ident) => {
                let name = &ident.ident;
                quote! { #name }
            }
            other => quote! { #other },
        })
        .collect()
}

/// Check if the return type is a `Result<..>`
pub fn returns_result(output: &ReturnType) -> bool {
    if let ReturnType::Type(_, ty) = output {
        if let Type::Path(type_path) = ty.as_ref() {
            if let Some(segment) = type_path.path.segments.last() {
                return segment.ident == "Result";
            }
        }
    }
    false
}

/// Converts a call expression into `anyhow::Result<Value>`.
pub fn value_return(output: &ReturnType, call: TokenStream) -> TokenStream {
    match output {
        ReturnType::Default => quote! {
            #call;
            ::conduit_dispatch::into_value(())
        },
        _ if returns_result(output) => quote! {
            ::conduit_dispatch::into_value(
                #call.map_err(::conduit_dispatch::__private::anyhow::Error::from)?
            )
        },
        _ => quote! { ::conduit_dispatch::into_value(#call) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(tokens: TokenStream) -> Signature {
        let item: syn::ItemFn = syn::parse2(tokens).unwrap();
        item.sig
    }

    #[test]
    fn test_param_key_defaults_to_ident() {
        let s = sig(quote! { fn greet(name: String) {} });
        let params = parse_params(&s).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].key, "name");
        assert!(params[0].default.is_none());
    }

    #[test]
    fn test_param_attribute_overrides() {
        let s = sig(quote! {
            fn greet(#[param(name = "who", default = "World")] name: String) {}
        });
        let params = parse_params(&s).unwrap();
        assert_eq!(params[0].key, "who");
        assert!(params[0].default.is_some());
    }

    #[test]
    fn test_unknown_param_attribute_rejected() {
        let s = sig(quote! { fn greet(#[param(label = "x")] name: String) {} });
        assert!(parse_params(&s).is_err());
    }

    #[test]
    fn test_receiver_skipped() {
        let s = sig(quote! { fn greet(&self, name: String) {} });
        assert_eq!(parse_params(&s).unwrap().len(), 1);
    }

    #[test]
    fn test_strip_param_attrs() {
        let mut s = sig(quote! { fn greet(#[param(default = 1)] n: i64) {} });
        strip_param_attrs(&mut s);
        let FnArg::Typed(pat_type) = &s.inputs[0] else {
            panic!("expected typed arg");
        };
        assert!(pat_type.attrs.is_empty());
    }

    #[test]
    fn test_returns_result() {
        let s = sig(quote! { fn f() -> Result<String, MyError> { todo!() } });
        assert!(returns_result(&s.output));
        let s = sig(quote! { fn f() -> String { todo!() } });
        assert!(!returns_result(&s.output));
    }
}
