//! `#[callable]` proc macro for hook functions.
//!
//! Turns a plain function into a [`Callable`] factory. Parameters are bound
//! from the input map the same way target methods are.
//!
//! ```rust,ignore
//! use conduit_dispatch::callable;
//!
//! #[callable]
//! fn require_token(#[param(default = "")] token: String) -> bool {
//!     token == "s3cret"
//! }
//!
//! // Generates:
//! // fn require_token__callable() -> ::conduit_dispatch::Callable {
//! //     ::conduit_dispatch::Callable::new(
//! //         "require_token",
//! //         vec![ParamSpec::of::<String>("token").with_default(json!(""))],
//! //         |mut __args| { let token: String = __args.take::<String>(0)?; into_value(require_token(token)) },
//! //     )
//! // }
//! ```
//!
//! [`Callable`]: https://docs.rs/conduit-dispatch/latest/conduit_dispatch/struct.Callable.html

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{spanned::Spanned, Error, FnArg, ItemFn, Result};

use crate::params::{
    args_pattern, call_args, extractions, param_specs, parse_params, strip_param_attrs,
    value_return,
};

/// Main implementation of the #[callable] macro
pub fn callable_impl(_attr: TokenStream, item: TokenStream) -> Result<TokenStream> {
    let fn_item: ItemFn = syn::parse2(item)?;

    if let Some(FnArg::Receiver(recv)) = fn_item.sig.inputs.first() {
        return Err(Error::new(
            recv.span(),
            "#[callable] functions cannot have self parameter",
        ));
    }
    if !fn_item.sig.generics.params.is_empty() {
        return Err(Error::new(
            fn_item.sig.generics.span(),
            "#[callable] functions cannot be generic",
        ));
    }

    let fn_name = &fn_item.sig.ident;
    let fn_vis = &fn_item.vis;
    let factory_name = format_ident!("{}__callable", fn_name);
    let key = fn_name.to_string();

    let params = parse_params(&fn_item.sig)?;
    let specs = param_specs(&params);
    let extract = extractions(&params);
    let args = call_args(&params);
    let pat = args_pattern(&params);
    let body = value_return(&fn_item.sig.output, quote! { #fn_name(#(#args),*) });

    let mut clean_fn = fn_item.clone();
    strip_param_attrs(&mut clean_fn.sig);

    Ok(quote! {
        #clean_fn

        #[allow(non_snake_case)]
        #fn_vis fn #factory_name() -> ::conduit_dispatch::Callable {
            ::conduit_dispatch::Callable::new(#key, #specs, |#pat: ::conduit_dispatch::Args| {
                #(#extract)*
                #body
            })
        }
    })
}
