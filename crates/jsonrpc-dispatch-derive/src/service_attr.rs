//! Implementation of the #[rpc_service] attribute macro

use std::collections::HashSet;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{ImplItem, ItemImpl, Result};

use crate::utils::{extract_rpc_meta, strip_rpc_attrs, unexportable_reason};

pub fn rpc_service_impl(args: TokenStream, mut input: ItemImpl) -> Result<TokenStream> {
    if !args.is_empty() {
        return Err(syn::Error::new_spanned(args, "#[rpc_service] takes no arguments"));
    }
    if let Some((_, trait_path, _)) = &input.trait_ {
        return Err(syn::Error::new_spanned(
            trait_path,
            "#[rpc_service] must be placed on an inherent impl block",
        ));
    }

    let mut exports = Vec::new();
    let mut seen = HashSet::new();

    for item in &mut input.items {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        let meta = extract_rpc_meta(&method.attrs)?;
        let reason = unexportable_reason(method);

        match (&meta, reason) {
            (Some(_), Some(reason)) => {
                return Err(syn::Error::new_spanned(&method.sig, reason));
            }
            (None, Some(_)) => continue,
            (Some(meta), None) if meta.skip => {}
            (meta, None) => {
                let fn_name = method.sig.ident.clone();
                let rpc_name = meta
                    .as_ref()
                    .and_then(|meta| meta.name.clone())
                    .unwrap_or_else(|| fn_name.to_string());
                if !seen.insert(rpc_name.clone()) {
                    return Err(syn::Error::new_spanned(
                        &method.sig.ident,
                        format!("rpc method `{rpc_name}` is exported twice"),
                    ));
                }
                exports.push((rpc_name, fn_name));
            }
        }
        strip_rpc_attrs(&mut method.attrs);
    }

    let self_ty = &input.self_ty;
    let (impl_generics, _, where_clause) = input.generics.split_for_impl();

    let entries = exports.iter().map(|(rpc_name, fn_name)| {
        quote! {
            (#rpc_name, {
                let this = ::std::sync::Arc::clone(&self);
                ::std::sync::Arc::new(move |ctx: &mut ::jsonrpc_dispatch::RequestContext| {
                    Self::#fn_name(&this, ctx)
                }) as ::jsonrpc_dispatch::Handler
            })
        }
    });

    Ok(quote! {
        #input

        impl #impl_generics ::jsonrpc_dispatch::RpcService for #self_ty #where_clause {
            fn methods(
                self: ::std::sync::Arc<Self>,
            ) -> ::std::vec::Vec<(&'static str, ::jsonrpc_dispatch::Handler)> {
                ::std::vec![#(#entries),*]
            }
        }
    })
}
