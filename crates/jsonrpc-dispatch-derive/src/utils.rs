//! Signature checks and attribute parsing for `#[rpc_service]`

use syn::{Attribute, FnArg, ImplItemFn, Result, ReturnType, Type, Visibility};

/// Parsed `#[rpc(...)]` options on one method
#[derive(Debug, Default, PartialEq)]
pub struct RpcMethodMeta {
    pub name: Option<String>,
    pub skip: bool,
}

/// Read the `#[rpc(...)]` attribute of a method, if it has one.
pub fn extract_rpc_meta(attrs: &[Attribute]) -> Result<Option<RpcMethodMeta>> {
    let mut found: Option<RpcMethodMeta> = None;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("rpc")) {
        if found.is_some() {
            return Err(syn::Error::new_spanned(attr, "duplicate #[rpc(...)] attribute"));
        }
        let mut meta = RpcMethodMeta::default();
        attr.parse_nested_meta(|nested| {
            if nested.path.is_ident("name") {
                let s: syn::LitStr = nested.value()?.parse()?;
                let name = s.value();
                if name.is_empty() {
                    return Err(syn::Error::new_spanned(&s, "rpc method name must not be empty"));
                }
                if name.contains('.') {
                    return Err(syn::Error::new_spanned(&s, "rpc method name must not contain '.'"));
                }
                meta.name = Some(name);
                Ok(())
            } else if nested.path.is_ident("skip") {
                meta.skip = true;
                Ok(())
            } else {
                Err(nested.error("expected `name = \"...\"` or `skip`"))
            }
        })?;
        found = Some(meta);
    }

    Ok(found)
}

/// Drop `#[rpc(...)]` attributes so the emitted impl compiles.
pub fn strip_rpc_attrs(attrs: &mut Vec<Attribute>) {
    attrs.retain(|attr| !attr.path().is_ident("rpc"));
}

/// Why a method cannot be exported, or `None` if it can.
pub fn unexportable_reason(method: &ImplItemFn) -> Option<&'static str> {
    let sig = &method.sig;
    if !matches!(method.vis, Visibility::Public(_)) {
        return Some("exported rpc methods must be `pub`");
    }
    if sig.asyncness.is_some() {
        return Some("rpc methods run synchronously and cannot be `async`");
    }
    if sig.unsafety.is_some() {
        return Some("rpc methods cannot be `unsafe`");
    }
    if !sig.generics.params.is_empty() {
        return Some("rpc methods cannot be generic");
    }
    if !returns_unit(&sig.output) {
        return Some("rpc methods report through the context and must return `()`");
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver)) if receiver.reference.is_some() && receiver.mutability.is_none() && receiver.colon_token.is_none() => {}
        _ => return Some("rpc methods must take `&self`"),
    }
    match (inputs.next(), inputs.next()) {
        (Some(FnArg::Typed(arg)), None) if is_request_context_ref(&arg.ty) => None,
        _ => Some("rpc methods take exactly one argument: `&mut RequestContext`"),
    }
}

fn returns_unit(output: &ReturnType) -> bool {
    match output {
        ReturnType::Default => true,
        ReturnType::Type(_, ty) => matches!(ty.as_ref(), Type::Tuple(tuple) if tuple.elems.is_empty()),
    }
}

/// `&mut RequestContext`, under any path prefix.
pub fn is_request_context_ref(ty: &Type) -> bool {
    let Type::Reference(reference) = ty else {
        return false;
    };
    if reference.mutability.is_none() {
        return false;
    }
    match reference.elem.as_ref() {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "RequestContext" && segment.arguments.is_empty()),
        _ => false,
    }
}
